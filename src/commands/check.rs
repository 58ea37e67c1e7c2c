//! `check`: connectivity and key verification.

use anyhow::{Context, Result};
use serde_json::Value;
use torbox_core::JobApi;
use tracing::debug;

use super::AppContext;

pub async fn run_check_command(ctx: &AppContext) -> Result<()> {
    let client = ctx.client()?;
    let profile = client
        .check_connection()
        .await
        .context("Torbox connection check failed")?;
    debug!(?profile, "user profile received");

    println!("connected to {}", client.base_url());
    if let Some(summary) = profile_summary(&profile) {
        println!("{summary}");
    }
    Ok(())
}

fn profile_summary(profile: &Value) -> Option<String> {
    let email = profile.get("email").and_then(Value::as_str);
    let plan = profile.get("plan").and_then(|plan| match plan {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    });
    match (email, plan) {
        (Some(email), Some(plan)) => Some(format!("account = {email} (plan {plan})")),
        (Some(email), None) => Some(format!("account = {email}")),
        (None, Some(plan)) => Some(format!("plan = {plan}")),
        (None, None) => None,
    }
}
