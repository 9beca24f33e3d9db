//! Anonymous quota handler

use colored::Colorize;

use crate::api::Identity;
use crate::config::Config;
use crate::error::Result;
use crate::session::quota::anonymous_identity;
use crate::session::QuotaGate;

/// Show, or reset, today's anonymous allowance
pub fn show_quota(config: &Config, reset: bool) -> Result<()> {
    if config.backend.auth_token.is_some() {
        println!("Logged in: no daily limit.");
        return Ok(());
    }

    let storage = super::open_storage(config);
    let identity: Identity = anonymous_identity(storage.as_ref());
    let mut gate = QuotaGate::new(config.quota.daily_limit, storage);

    if reset {
        gate.reset();
        println!("{}", "Quota reset.".green());
    }

    let remaining = gate.remaining(&identity).unwrap_or(gate.limit());
    let line = format!("{} of {} estimates left today.", remaining, gate.limit());
    if remaining == 0 {
        println!("{}", line.red());
    } else {
        println!("{}", line);
    }
    Ok(())
}
