//! `openclaw message send` — one-shot outbound message via the running
//! gateway.

use oc_domain::config::Config;

pub async fn send(
    config: &Config,
    channel: &str,
    to: &str,
    text: &str,
    account: &str,
    json: bool,
) -> anyhow::Result<bool> {
    let url = format!("http://127.0.0.1:{}/rpc", config.gateway.port);
    let client = reqwest::Client::new();
    let mut req = client.post(&url).json(&serde_json::json!({
        "id": 1,
        "method": "chat.send",
        "params": {
            "channel": channel,
            "to": to,
            "text": text,
            "accountId": account,
        }
    }));
    if let Some(token) = config.gateway.auth.resolve_token() {
        req = req.bearer_auth(token);
    }

    let body: serde_json::Value = req.send().await?.json().await?;
    let ok = body.get("error").is_none();
    if json {
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else if ok {
        println!("sent");
    } else {
        eprintln!(
            "send failed: {}",
            body.pointer("/error/message").and_then(|m| m.as_str()).unwrap_or("?")
        );
    }
    Ok(ok)
}
