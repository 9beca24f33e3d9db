use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{json, Value};
use tempfile::TempDir;

use estimate_chat::api::fake::{FakeBackend, FakeGenerative};
use estimate_chat::api::Identity;
use estimate_chat::config::ChatConfig;
use estimate_chat::session::{ChatSessionContext, ManualClock, QuotaGate};
use estimate_chat::storage::MemoryStore;

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Wrap `data` the way the backend does
#[allow(dead_code)]
pub fn envelope(data: Value) -> Value {
    json!([{
        "statusCode": 200,
        "message": "success",
        "data": data,
        "metadata": null,
        "error": null
    }])
}

#[allow(dead_code)]
pub fn anonymous() -> Identity {
    Identity::Anonymous {
        anonymous_id: "anon-test".to_string(),
    }
}

#[allow(dead_code)]
pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Context wired to in-process fakes
#[allow(dead_code)]
pub struct Harness {
    pub ctx: ChatSessionContext,
    pub backend: Arc<FakeBackend>,
    pub generative: Arc<FakeGenerative>,
    pub clock: Arc<ManualClock>,
}

#[allow(dead_code)]
pub fn harness(limit: u32) -> Harness {
    let backend = Arc::new(FakeBackend::new());
    let generative = Arc::new(FakeGenerative::new());
    let clock = Arc::new(ManualClock::new(day(2025, 3, 1)));
    let quota = QuotaGate::with_clock(limit, Arc::new(MemoryStore::new()), clock.clone());
    let ctx = ChatSessionContext::new(
        backend.clone(),
        generative.clone(),
        "You are the estimate assistant.",
        quota,
        anonymous(),
        ChatConfig::default(),
    );
    Harness {
        ctx,
        backend,
        generative,
        clock,
    }
}

/// Invoice block whose stated total is `stated` while items sum to 2400
#[allow(dead_code)]
pub fn invoice_block(stated: f64) -> String {
    let payload = json!({
        "project": "Clinic booking app",
        "invoiceGroup": [
            {"category": "Frontend", "items": [
                {"feature": "Booking flow", "description": "Calendar and slots", "amount": 1500, "duration": 3},
                {"feature": "Profile", "description": "", "amount": 400, "duration": 1}
            ]},
            {"category": "Backend", "items": [
                {"feature": "Admin API", "description": "CRUD", "amount": 500, "duration": 2}
            ]}
        ],
        "total": {"amount": stated, "duration": 6, "pages": 4}
    });
    format!("<script type=\"application/json\">{}</script>", payload)
}
