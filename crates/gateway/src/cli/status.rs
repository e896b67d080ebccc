//! `openclaw status` — query a running gateway over RPC.

use oc_domain::config::Config;

/// Call the local gateway's `status` method. Exit code 1 when the gateway
/// is unreachable.
pub async fn run(config: &Config, json: bool) -> anyhow::Result<bool> {
    let url = format!("http://127.0.0.1:{}/rpc", config.gateway.port);
    let client = reqwest::Client::new();
    let mut req = client.post(&url).json(&serde_json::json!({
        "id": 1,
        "method": "status",
        "params": {}
    }));
    if let Some(token) = config.gateway.auth.resolve_token() {
        req = req.bearer_auth(token);
    }

    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("gateway unreachable at {url}: {e}");
            return Ok(false);
        }
    };
    let body: serde_json::Value = resp.json().await?;
    let result = body.get("result").cloned().unwrap_or_default();

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(true);
    }

    println!("sessions: {}", result["sessions"].as_u64().unwrap_or(0));
    println!(
        "pending approvals: {}",
        result["pendingApprovals"].as_u64().unwrap_or(0)
    );
    if let Some(accounts) = result["accounts"].as_array() {
        for account in accounts {
            let connected = account["status"]["connected"].as_bool().unwrap_or(false);
            println!(
                "{} / {} — {}",
                account["channel"].as_str().unwrap_or("?"),
                account["account"].as_str().unwrap_or("?"),
                if connected { "connected" } else { "disconnected" }
            );
        }
    }
    Ok(true)
}
