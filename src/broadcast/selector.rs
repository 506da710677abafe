//! Audience selector tokens.
//!
//! Tokens are parsed once into a closed [`Selector`] so every store
//! implementation has to handle every category (exhaustive `match`).

use std::fmt;
use std::str::FromStr;
use strum::EnumIter;

use crate::broadcast::error::BroadcastError;
use crate::broadcast::model::Channel;

const TARIFF_PREFIX: &str = "tariff_";

/// Telegram audience categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum UserCategory {
    All,
    ActiveSubscription,
    Trial,
    NoSubscription,
    /// Paid subscription ending within the configured window
    ExpiringSoon,
    Expired,
    /// Active paid subscription that never used any traffic
    ActiveZeroTraffic,
    TrialZeroTraffic,
    RegisteredToday,
    RegisteredWeek,
    RegisteredMonth,
    ActiveToday,
    InactiveWeek,
    InactiveMonth,
    /// Came in through someone's referral link
    Referred,
    /// Registered without a referrer
    Direct,
}

/// Email audience categories. All of them require a verified address and
/// an active user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum EmailCategory {
    All,
    ActiveSubscription,
    Trial,
    NoSubscription,
    ExpiringSoon,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    User(UserCategory),
    /// Users with an active subscription on this tariff
    Tariff(i64),
    Email(EmailCategory),
}

impl UserCategory {
    pub fn token(self) -> &'static str {
        match self {
            UserCategory::All => "all",
            UserCategory::ActiveSubscription => "active",
            UserCategory::Trial => "trial",
            UserCategory::NoSubscription => "no",
            UserCategory::ExpiringSoon => "expiring",
            UserCategory::Expired => "expired",
            UserCategory::ActiveZeroTraffic => "active_zero",
            UserCategory::TrialZeroTraffic => "trial_zero",
            UserCategory::RegisteredToday => "custom_today",
            UserCategory::RegisteredWeek => "custom_week",
            UserCategory::RegisteredMonth => "custom_month",
            UserCategory::ActiveToday => "custom_active_today",
            UserCategory::InactiveWeek => "custom_inactive_week",
            UserCategory::InactiveMonth => "custom_inactive_month",
            UserCategory::Referred => "custom_referrals",
            UserCategory::Direct => "custom_direct",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        let category = match token {
            "all" => UserCategory::All,
            "active" => UserCategory::ActiveSubscription,
            "trial" => UserCategory::Trial,
            "no" => UserCategory::NoSubscription,
            "expiring" => UserCategory::ExpiringSoon,
            "expired" => UserCategory::Expired,
            "active_zero" => UserCategory::ActiveZeroTraffic,
            "trial_zero" => UserCategory::TrialZeroTraffic,
            "custom_today" => UserCategory::RegisteredToday,
            "custom_week" => UserCategory::RegisteredWeek,
            "custom_month" => UserCategory::RegisteredMonth,
            "custom_active_today" => UserCategory::ActiveToday,
            "custom_inactive_week" => UserCategory::InactiveWeek,
            "custom_inactive_month" => UserCategory::InactiveMonth,
            "custom_referrals" => UserCategory::Referred,
            "custom_direct" => UserCategory::Direct,
            _ => return None,
        };
        Some(category)
    }
}

impl EmailCategory {
    pub fn token(self) -> &'static str {
        match self {
            EmailCategory::All => "all_email",
            EmailCategory::ActiveSubscription => "email_active",
            EmailCategory::Trial => "email_trial",
            EmailCategory::NoSubscription => "email_no_sub",
            EmailCategory::ExpiringSoon => "email_expiring",
            EmailCategory::Expired => "email_expired",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        let category = match token {
            "all_email" => EmailCategory::All,
            "email_active" => EmailCategory::ActiveSubscription,
            "email_trial" => EmailCategory::Trial,
            "email_no_sub" => EmailCategory::NoSubscription,
            "email_expiring" => EmailCategory::ExpiringSoon,
            "email_expired" => EmailCategory::Expired,
            _ => return None,
        };
        Some(category)
    }
}

impl Selector {
    /// Channel this audience can be delivered on.
    pub fn channel(&self) -> Channel {
        match self {
            Selector::User(_) | Selector::Tariff(_) => Channel::Telegram,
            Selector::Email(_) => Channel::Email,
        }
    }

    /// Parses a token and checks it belongs to `channel`'s family.
    pub fn parse_for(token: &str, channel: Channel) -> Result<Self, BroadcastError> {
        let selector: Selector = token.parse()?;
        if selector.channel() != channel {
            return Err(BroadcastError::InvalidSelector(format!(
                "{} is not a {} audience",
                token, channel
            )));
        }
        Ok(selector)
    }
}

impl FromStr for Selector {
    type Err = BroadcastError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let token = raw.trim();
        if let Some(category) = UserCategory::from_token(token) {
            return Ok(Selector::User(category));
        }
        if let Some(category) = EmailCategory::from_token(token) {
            return Ok(Selector::Email(category));
        }
        if let Some(id) = token.strip_prefix(TARIFF_PREFIX) {
            return match id.parse::<i64>() {
                Ok(id) if id > 0 => Ok(Selector::Tariff(id)),
                _ => Err(BroadcastError::InvalidSelector(format!("bad tariff id in {}", token))),
            };
        }
        Err(BroadcastError::InvalidSelector(token.to_string()))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::User(category) => f.write_str(category.token()),
            Selector::Tariff(id) => write!(f, "{}{}", TARIFF_PREFIX, id),
            Selector::Email(category) => f.write_str(category.token()),
        }
    }
}
