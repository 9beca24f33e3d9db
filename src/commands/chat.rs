//! Interactive chat mode handler
//!
//! Builds a [`ChatSessionContext`] from configuration and runs a
//! readline-based loop. Replies stream to stdout as they arrive; the
//! embedded invoice block is held back and printed as a table once the
//! reply completes.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::Write;

use super::render;
use super::special_commands::{parse_special_command, print_help, SpecialCommand};
use crate::api::SessionIndex;
use crate::config::Config;
use crate::error::{EstimateError, Result};
use crate::session::{BeginReply, ChatSessionContext, ReplyOutcome};

const INVOICE_TAG: &str = "<script";
const INVOICE_CLOSE_TAG: &str = "</script";

/// Start interactive chat mode
///
/// # Arguments
///
/// * `config` - Global configuration (consumed)
/// * `session` - Backend index of a session to resume
pub async fn run_chat(config: Config, session: Option<i64>) -> Result<()> {
    let storage = super::open_storage(&config);
    let mut ctx = ChatSessionContext::from_config(&config, storage)?;
    let currency = config.localization.primary_currency_code.clone();

    print_welcome_banner(&mut ctx);

    if let Some(index) = session {
        open_session(&mut ctx, SessionIndex(index), &currency).await;
    }

    let mut rl = DefaultEditor::new()?;

    loop {
        let prompt = match ctx.store().current() {
            Some(index) => format!("[{}] >> ", index),
            None => "[new] >> ".to_string(),
        };
        match rl.readline(&prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(trimmed)?;

                match parse_special_command(trimmed) {
                    Ok(SpecialCommand::None) => {
                        let started = ctx.begin_reply(trimmed, Vec::new()).await;
                        stream_reply(&mut ctx, started, &currency).await;
                    }
                    Ok(SpecialCommand::Exit) => break,
                    Ok(command) => handle_command(&mut ctx, command, &currency).await,
                    Err(e) => println!("{}", e.to_string().red()),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }

    println!("Goodbye!");
    Ok(())
}

async fn handle_command(ctx: &mut ChatSessionContext, command: SpecialCommand, currency: &str) {
    match command {
        SpecialCommand::New => {
            ctx.start_new_session();
            println!("{}", "Started a new conversation.".green());
        }
        SpecialCommand::Sessions => match ctx.sessions().await {
            Ok(sessions) => {
                let sessions = sessions.to_vec();
                render::print_sessions(&sessions, ctx.cache(), ctx.store().current());
            }
            Err(e) => println!("{}", e.user_message().red()),
        },
        SpecialCommand::More => match ctx.more_sessions().await {
            Ok(0) => println!("{}", "No more sessions.".yellow()),
            Ok(_) => {
                let sessions = ctx.cache().entries().to_vec();
                render::print_sessions(&sessions, ctx.cache(), ctx.store().current());
            }
            Err(e) => println!("{}", e.user_message().red()),
        },
        SpecialCommand::Open(index) => open_session(ctx, SessionIndex(index), currency).await,
        SpecialCommand::Toggle(number) => {
            let result = match number.checked_sub(1) {
                Some(index) => ctx.toggle_visibility(index),
                None => Err(EstimateError::UnknownTurn("turns are numbered from 1".into()).into()),
            };
            match result {
                Ok(true) => println!("Turn {} hidden.", number),
                Ok(false) => println!("Turn {} shown.", number),
                Err(e) => println!("{}", error_message(&e).red()),
            }
        }
        SpecialCommand::Retry => {
            let started = ctx.regenerate().await;
            stream_reply(ctx, started, currency).await;
        }
        SpecialCommand::Transcript => print_transcript(ctx, currency),
        SpecialCommand::Platform => {
            let index = ctx.append_platform_selection();
            println!("Inserted platform selection as turn {}.", index + 1);
        }
        SpecialCommand::Quota => print_quota(ctx),
        SpecialCommand::Help => print_help(),
        SpecialCommand::Exit | SpecialCommand::None => {}
    }
}

async fn stream_reply(ctx: &mut ChatSessionContext, started: Result<BeginReply>, currency: &str) {
    let reply = match started {
        Ok(BeginReply::Started(reply)) => reply,
        Ok(BeginReply::QuotaExhausted) => {
            println!(
                "{}",
                "You have reached today's limit of free estimates. Log in or come back tomorrow."
                    .yellow()
            );
            return;
        }
        Err(e) => {
            println!("{}", error_message(&e).red());
            return;
        }
    };

    println!("{}", "estimate".green().bold());
    let mut live = LiveText::default();
    let outcome = ctx
        .drive_reply_with(reply, |chunk| {
            let visible = live.push(chunk);
            if !visible.is_empty() {
                print!("{}", visible);
                let _ = std::io::stdout().flush();
            }
        })
        .await;
    if !matches!(outcome, ReplyOutcome::Abandoned) {
        print!("{}", live.finish());
    }
    println!();

    match outcome {
        ReplyOutcome::Completed(reply) => {
            if let Some(invoice) = &reply.invoice {
                render::print_invoice(invoice, currency);
            }
            if reply.invoice_error.is_some() {
                println!("{}", "The estimate table could not be read for this reply.".yellow());
            }
            if let Some(error) = &reply.persist_error {
                println!("{} {}", "Reply was not saved:".yellow(), error.user_message());
            }
        }
        ReplyOutcome::Failed { error, .. } => {
            println!("{}", error.user_message().red());
            if error.is_retryable() {
                println!("Type {} to try again.", "/retry".cyan());
            }
        }
        ReplyOutcome::Abandoned => {}
    }
}

async fn open_session(ctx: &mut ChatSessionContext, index: SessionIndex, currency: &str) {
    match ctx.select_session(index).await {
        Ok(()) => {
            println!("{}", format!("Opened session {}.", index).green());
            print_transcript(ctx, currency);
        }
        Err(e) => println!("{}", e.user_message().red()),
    }
}

fn print_transcript(ctx: &ChatSessionContext, currency: &str) {
    let history = ctx.history();
    if history.is_empty() {
        println!("{}", "No messages yet.".dimmed());
        return;
    }
    for (index, turn) in history.turns().iter().enumerate() {
        render::print_turn(index + 1, turn);
    }
    if let Some(invoice) = history.latest_invoice() {
        render::print_invoice(invoice, currency);
    }
}

fn print_quota(ctx: &mut ChatSessionContext) {
    match ctx.quota_remaining() {
        Some(remaining) => println!("{} estimates left today.", remaining.to_string().bold()),
        None => println!("Logged in: no daily limit."),
    }
}

fn print_welcome_banner(ctx: &mut ChatSessionContext) {
    println!("{}", "Estimate assistant".bold());
    println!(
        "Describe your project and get a cost estimate. Type {} for commands.",
        "/help".cyan()
    );
    print_quota(ctx);
    println!();
}

fn error_message(error: &anyhow::Error) -> String {
    match error.downcast_ref::<EstimateError>() {
        Some(EstimateError::Api(api)) => api.user_message(),
        _ => error.to_string(),
    }
}

/// Streamed reply text with embedded invoice blocks held back
#[derive(Debug, Default)]
struct LiveText {
    raw: String,
    shown: usize,
    in_block: bool,
}

impl LiveText {
    /// Add a chunk and return the newly printable text
    fn push(&mut self, chunk: &str) -> String {
        self.raw.push_str(chunk);
        let lower = self.raw.to_ascii_lowercase();
        let mut visible = String::new();

        loop {
            if self.in_block {
                let Some(close) = lower[self.shown..].find(INVOICE_CLOSE_TAG) else {
                    return visible;
                };
                let after_close = self.shown + close + INVOICE_CLOSE_TAG.len();
                let Some(gt) = lower[after_close..].find('>') else {
                    return visible;
                };
                self.shown = after_close + gt + 1;
                self.in_block = false;
                continue;
            }

            match lower[self.shown..].find(INVOICE_TAG) {
                Some(pos) => {
                    visible.push_str(&self.raw[self.shown..self.shown + pos]);
                    self.shown += pos + INVOICE_TAG.len();
                    self.in_block = true;
                }
                None => {
                    // Hold back a tail that could be the start of the tag.
                    let held = (1..INVOICE_TAG.len())
                        .rev()
                        .find(|len| lower.ends_with(&INVOICE_TAG[..*len]))
                        .unwrap_or(0);
                    let end = (self.raw.len() - held).max(self.shown);
                    visible.push_str(&self.raw[self.shown..end]);
                    self.shown = end;
                    return visible;
                }
            }
        }
    }

    /// Release whatever was held back once the stream has ended
    ///
    /// An unterminated block stays hidden.
    fn finish(&mut self) -> String {
        if self.in_block {
            return String::new();
        }
        let rest = self.raw[self.shown..].to_string();
        self.shown = self.raw.len();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_text_passes_plain_text() {
        let mut live = LiveText::default();
        assert_eq!(live.push("Hello "), "Hello ");
        assert_eq!(live.push("world"), "world");
    }

    #[test]
    fn test_live_text_hides_block_split_across_chunks() {
        let mut live = LiveText::default();
        let mut shown = String::new();
        for chunk in ["Total below.\n<scr", "ipt type=\"application/json\">{", "}</script>"] {
            shown.push_str(&live.push(chunk));
        }
        assert_eq!(shown, "Total below.\n");
    }

    #[test]
    fn test_live_text_resumes_after_block() {
        let mut live = LiveText::default();
        let mut shown = String::new();
        for chunk in [
            "Here you go.\n<script type=\"application/json\">{\"a\":1}</scr",
            "ipt>\nLet me know ",
            "if anything changes.",
        ] {
            shown.push_str(&live.push(chunk));
        }
        shown.push_str(&live.finish());
        assert_eq!(shown, "Here you go.\n\nLet me know if anything changes.");
    }

    #[test]
    fn test_live_text_finish_flushes_held_tail() {
        let mut live = LiveText::default();
        assert_eq!(live.push("Is 3 <"), "Is 3 ");
        assert_eq!(live.finish(), "<");
    }

    #[test]
    fn test_live_text_unterminated_block_stays_hidden() {
        let mut live = LiveText::default();
        assert_eq!(live.push("Total:\n<script>{\"project\""), "Total:\n");
        assert_eq!(live.finish(), "");
    }

    #[test]
    fn test_live_text_releases_false_alarm() {
        let mut live = LiveText::default();
        assert_eq!(live.push("a <"), "a ");
        assert_eq!(live.push("b"), "<b");
    }

    #[test]
    fn test_error_message_prefers_api_banner() {
        let err: anyhow::Error =
            EstimateError::Api(crate::api::ApiError::Transport("reset".into())).into();
        assert_eq!(error_message(&err), crate::api::GENERIC_FAILURE_MESSAGE);
    }
}
