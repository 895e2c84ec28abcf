use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use leadline_core::config::ReceptionistConfig;
use leadline_core::domain::conversation::ConversationSession;

const MAX_WINDOW_SECS: u64 = 366 * 24 * 3_600;

/// What is about to go out, which decides the gates that apply to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutboundKind {
    /// AI-authored reply; counts toward the message cap.
    AiReply,
    /// Templated follow-up. Obeys stop, rate limit and staleness, not the cap.
    Scripted,
    /// Opt-out, help and re-subscribe replies. Never gated.
    Compliance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GuardrailInput<'a> {
    /// Inbound body being answered; `None` for proactive sends.
    pub body: Option<&'a str>,
    pub kind: OutboundKind,
}

impl<'a> GuardrailInput<'a> {
    pub fn inbound(body: &'a str) -> Self {
        Self { body: Some(body), kind: OutboundKind::AiReply }
    }

    pub fn proactive(kind: OutboundKind) -> Self {
        Self { body: None, kind }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum GuardrailVerdict {
    Proceed,
    SuppressRateLimited,
    /// `confirm` is set only on the transition into stopped, so exactly one
    /// compliance confirmation goes out.
    SuppressStopped { confirm: bool },
    EscalateCapReached,
    EscalateEmergency { phrase: String },
    Stale,
}

impl GuardrailVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proceed => "proceed",
            Self::SuppressRateLimited => "suppress_rate_limited",
            Self::SuppressStopped { .. } => "suppress_stopped",
            Self::EscalateCapReached => "escalate_cap_reached",
            Self::EscalateEmergency { .. } => "escalate_emergency",
            Self::Stale => "stale",
        }
    }

    pub fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed)
    }

    /// Writes the verdict's sticky flags onto the session. Flags only ever
    /// move from false to true here.
    pub fn apply(&self, session: &mut ConversationSession, now: DateTime<Utc>) {
        match self {
            Self::SuppressStopped { .. } => session.mark_stopped(now),
            Self::EscalateCapReached => session.mark_escalated("cap_reached", now),
            Self::EscalateEmergency { phrase } => {
                session.mark_escalated(format!("emergency: {phrase}"), now)
            }
            Self::Stale => session.mark_stale(now),
            Self::Proceed | Self::SuppressRateLimited => {}
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub max_ai_messages: u32,
    pub min_outbound_interval: Duration,
    pub stale_after: Duration,
    pub stop_phrases: Vec<String>,
    pub emergency_phrases: Vec<String>,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self::from_config(&leadline_core::config::AppConfig::default().receptionist)
    }
}

impl GuardrailPolicy {
    pub fn from_config(config: &ReceptionistConfig) -> Self {
        Self {
            max_ai_messages: config.max_ai_messages,
            min_outbound_interval: Duration::seconds(
                config.min_outbound_interval_secs.min(MAX_WINDOW_SECS) as i64,
            ),
            stale_after: Duration::seconds(
                config.stale_after_hours.saturating_mul(3_600).min(MAX_WINDOW_SECS) as i64,
            ),
            stop_phrases: lowercase_all(&config.stop_keywords),
            emergency_phrases: lowercase_all(&config.emergency_keywords),
        }
    }

    /// First matching rule wins: stop, emergency, cap, rate limit, stale.
    pub fn evaluate(
        &self,
        session: &ConversationSession,
        input: GuardrailInput<'_>,
        now: DateTime<Utc>,
    ) -> GuardrailVerdict {
        let body = input.body.map(str::to_lowercase);
        let body = body.as_deref();

        if let Some(body) = body {
            if self.stop_phrases.iter().any(|phrase| contains_word(body, phrase)) {
                return GuardrailVerdict::SuppressStopped { confirm: !session.stopped };
            }
        }
        if input.kind == OutboundKind::Compliance {
            return GuardrailVerdict::Proceed;
        }
        if session.stopped {
            return GuardrailVerdict::SuppressStopped { confirm: false };
        }

        if let Some(body) = body {
            let emergency =
                self.emergency_phrases.iter().find(|phrase| body.contains(phrase.as_str()));
            if let Some(phrase) = emergency {
                return GuardrailVerdict::EscalateEmergency { phrase: phrase.clone() };
            }
        }

        if input.kind == OutboundKind::AiReply && session.message_count >= self.max_ai_messages {
            return GuardrailVerdict::EscalateCapReached;
        }

        if self.rate_limited(session, now) {
            return GuardrailVerdict::SuppressRateLimited;
        }

        if input.body.is_none() && self.is_stale(session, now) {
            return GuardrailVerdict::Stale;
        }

        GuardrailVerdict::Proceed
    }

    pub fn rate_limited(&self, session: &ConversationSession, now: DateTime<Utc>) -> bool {
        session
            .last_outbound_at
            .is_some_and(|last| now.signed_duration_since(last) < self.min_outbound_interval)
    }

    fn is_stale(&self, session: &ConversationSession, now: DateTime<Utc>) -> bool {
        session.awaiting_reply()
            && session
                .last_outbound_at
                .is_some_and(|last| now.signed_duration_since(last) > self.stale_after)
    }
}

fn lowercase_all(phrases: &[String]) -> Vec<String> {
    phrases
        .iter()
        .map(|phrase| phrase.trim().to_lowercase())
        .filter(|phrase| !phrase.is_empty())
        .collect()
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

/// `phrase` occurs in `haystack` with a word boundary on both sides.
fn contains_word(haystack: &str, phrase: &str) -> bool {
    haystack.match_indices(phrase).any(|(start, matched)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + matched.len()..].chars().next();
        let starts_clean = before.map_or(true, |ch| !is_word_char(ch))
            || !phrase.chars().next().is_some_and(is_word_char);
        let ends_clean = after.map_or(true, |ch| !is_word_char(ch))
            || !phrase.chars().next_back().is_some_and(is_word_char);
        starts_clean && ends_clean
    })
}
