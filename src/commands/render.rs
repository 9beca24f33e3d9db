//! Terminal output for turns, invoices and session lists

use colored::Colorize;
use prettytable::{format, row, Table};

use crate::api::{ChatSession, SessionIndex};
use crate::invoice::Invoice;
use crate::session::{Role, SessionListCache, Turn, TurnStatus};

/// Format an amount with two decimals and the currency code
pub fn format_amount(amount: f64, currency: &str) -> String {
    format!("{:.2} {}", amount, currency)
}

/// Print one transcript turn; hidden turns print as a single marker line
pub fn print_turn(number: usize, turn: &Turn) {
    let label = match turn.role() {
        Role::User => "you".cyan().bold(),
        Role::Assistant => "estimate".green().bold(),
        Role::PlatformSelection => {
            println!("{} {}", format!("[{}]", number).dimmed(), "(platform selection)".dimmed());
            return;
        }
    };
    if turn.is_hidden() {
        println!("{} {} {}", format!("[{}]", number).dimmed(), label, "(hidden)".dimmed());
        return;
    }

    println!("{} {}", format!("[{}]", number).dimmed(), label);
    println!("{}", turn.display_text());
    for file in turn.files() {
        println!("  {} {}", "attached:".dimmed(), file.display_name);
    }
    match turn.status() {
        TurnStatus::Failed => println!("{}", "(reply interrupted)".red()),
        TurnStatus::InProgress => println!("{}", "(streaming)".yellow()),
        TurnStatus::Completed => {}
    }
    println!();
}

/// Print an invoice as a table
pub fn print_invoice(invoice: &Invoice, currency: &str) {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row![
        "Category".bold(),
        "Feature".bold(),
        "Amount".bold(),
        "Duration".bold(),
        "Pages".bold()
    ]);

    for group in &invoice.invoice_group {
        for item in &group.items {
            table.add_row(row![
                group.category,
                item.feature,
                format_amount(item.amount, currency),
                item.duration,
                item.pages.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
            ]);
        }
    }
    table.add_row(row![
        "Total".bold(),
        "",
        format_amount(invoice.total.amount, currency).bold(),
        invoice.total.duration,
        invoice.total.pages.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
    ]);

    println!("\n{}", invoice.project.bold());
    table.printstd();
    if let Some(discrepancy) = &invoice.reconciliation {
        println!(
            "{}",
            format!(
                "Stated total {} did not match the line items; showing {}.",
                format_amount(discrepancy.stated, currency),
                format_amount(discrepancy.computed, currency)
            )
            .yellow()
        );
    }
    println!();
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

/// Print sessions as a table
pub fn print_sessions(
    sessions: &[ChatSession],
    cache: &SessionListCache,
    current: Option<SessionIndex>,
) {
    if sessions.is_empty() {
        println!("{}", "No saved sessions.".yellow());
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row![
        "Index".bold(),
        "Title".bold(),
        "Last message".bold(),
        "Updated".bold()
    ]);

    for session in sessions {
        let index = session
            .index
            .map(|i| i.to_string())
            .unwrap_or_else(|| "-".to_string());
        let index = if session.index.is_some() && session.index == current {
            index.green().bold()
        } else {
            index.cyan()
        };
        let updated = session
            .updated_at()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(row![
            index,
            truncate(cache.display_title(session), 40),
            truncate(&session.last_message_preview().unwrap_or_default(), 40),
            updated
        ]);
    }

    table.printstd();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(2400.0, "USD"), "2400.00 USD");
        assert_eq!(format_amount(0.1 + 0.2, "EUR"), "0.30 EUR");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 40), "short");
        let long = "a".repeat(50);
        let cut = truncate(&long, 10);
        assert_eq!(cut.chars().count(), 10);
        assert!(cut.ends_with("..."));
    }
}
