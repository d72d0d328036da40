//! Terminal transcript.
//!
//! [`Transcript`] compares each published snapshot with what it already
//! printed and writes only the difference.

use std::io::{self, Write};

use chrono::{Local, Utc};
use medchat_core::format::{format_relative_time_from, render_markup, truncate_chars};
use medchat_core::{ChatSnapshot, ConnectionStatus, Message};

const TITLE_WIDTH: usize = 40;

#[derive(Debug, Default)]
pub struct Transcript {
    conversation_id: Option<String>,
    shown: usize,
    status: Option<ConnectionStatus>,
    typing: bool,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Print whatever changed since the previous call.
    pub fn update(&mut self, snapshot: &ChatSnapshot, out: &mut impl Write) -> io::Result<()> {
        if self.status != Some(snapshot.connection_status) {
            self.status = Some(snapshot.connection_status);
            writeln!(out, "[{}]", snapshot.connection_status.display_label())?;
        }

        if self.conversation_id != snapshot.current_conversation_id {
            self.conversation_id = snapshot.current_conversation_id.clone();
            self.shown = 0;
            if let Some(conversation) = snapshot.current_conversation() {
                writeln!(out, "\n━━ {} ━━", conversation.title)?;
            }
        }

        // The thread only ever grows while the same conversation is open
        for message in snapshot.messages.iter().skip(self.shown) {
            write_message(message, out)?;
        }
        self.shown = snapshot.messages.len();

        if snapshot.is_typing && !self.typing {
            let label = if snapshot.is_analyzing {
                "🔬 Analyse médicale en cours..."
            } else {
                "L'assistant écrit..."
            };
            writeln!(out, "  {}", label)?;
        }
        self.typing = snapshot.is_typing;

        out.flush()
    }
}

fn write_message(message: &Message, out: &mut impl Write) -> io::Result<()> {
    let time = message.timestamp.with_timezone(&Local).format("%H:%M");
    let speaker = if message.is_bot() { "🤖" } else { "vous" };
    let body = if message.is_bot() {
        render_markup(&message.text)
    } else {
        message.text.clone()
    };

    let mut lines = body.lines();
    writeln!(
        out,
        "{} {}: {}",
        time,
        speaker,
        lines.next().unwrap_or_default()
    )?;
    for line in lines {
        writeln!(out, "    {}", line)?;
    }
    Ok(())
}

/// Conversation list for `/list`, numbered for `/switch` and `/delete`.
pub fn write_conversation_list(snapshot: &ChatSnapshot, out: &mut impl Write) -> io::Result<()> {
    let now = Utc::now();
    for (idx, conversation) in snapshot.conversations.iter().enumerate() {
        let marker = if snapshot.current_conversation_id.as_deref() == Some(&conversation.id) {
            '*'
        } else {
            ' '
        };
        writeln!(
            out,
            "{} {:>2}. {:<width$} {:>3} msgs  {:<10} {}",
            marker,
            idx + 1,
            truncate_chars(&conversation.title, TITLE_WIDTH),
            conversation.messages.len(),
            conversation.consultation_stage.as_str(),
            format_relative_time_from(conversation.last_updated, now),
            width = TITLE_WIDTH,
        )?;
    }
    Ok(())
}

pub fn write_status(snapshot: &ChatSnapshot, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "Connexion: {}", snapshot.connection_status.display_label())?;
    if let Some(stage) = snapshot.current_consultation_stage {
        writeln!(out, "Étape: {}", stage.as_str())?;
    }
    if snapshot.pending_count > 0 {
        writeln!(out, "En attente d'envoi: {}", snapshot.pending_count)?;
    }
    Ok(())
}
