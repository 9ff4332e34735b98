//! Conversation context assembly for the model prompt.

use crate::store::{Message, MessageDirection};

/// One prior turn in a conversation, tagged by speaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Assistant,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Client => "Client",
            Self::Assistant => "You",
        }
    }
}

/// Turn stored thread history (oldest first, current message excluded)
/// into prompt turns.
pub fn build_turns(history: &[Message]) -> Vec<Turn> {
    history
        .iter()
        .map(|m| Turn {
            role: match m.direction {
                MessageDirection::Inbound => Role::Client,
                MessageDirection::Outbound => Role::Assistant,
            },
            text: m.body.clone(),
        })
        .collect()
}

/// Render turns as a transcript block for the prompt.
pub fn render_transcript(turns: &[Turn]) -> String {
    let mut out = String::new();
    for turn in turns {
        out.push_str(turn.role.label());
        out.push_str(": ");
        out.push_str(&turn.text);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MessageStatus, ReplySource};
    use chrono::Utc;

    fn message(direction: MessageDirection, body: &str) -> Message {
        Message {
            id: "m".into(),
            account_id: 1,
            direction,
            from_number: "+1".into(),
            to_number: "+2".into(),
            body: body.into(),
            status: MessageStatus::Received,
            external_id: None,
            thread_id: "t".into(),
            reply_source: match direction {
                MessageDirection::Outbound => Some(ReplySource::Ai),
                MessageDirection::Inbound => None,
            },
            in_reply_to: None,
            retry_count: 0,
            error: None,
            is_read: false,
            is_flagged: false,
            flag_reason: None,
            created_at: Utc::now(),
            sent_at: None,
            delivered_at: None,
            failed_at: None,
        }
    }

    #[test]
    fn transcript_tags_speakers_in_order() {
        let history = vec![
            message(MessageDirection::Inbound, "are you open?"),
            message(MessageDirection::Outbound, "Yes, until 5pm."),
            message(MessageDirection::Inbound, "great, thanks"),
        ];
        let transcript = render_transcript(&build_turns(&history));
        assert_eq!(
            transcript,
            "Client: are you open?\nYou: Yes, until 5pm.\nClient: great, thanks\n"
        );
    }
}
