use firewatch_core::types::ChangeBatch;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct AckError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AckFrame {
    /// Some gateways omit it on replies; `req_id` is what correlates.
    #[serde(default)]
    pub method: String,
    pub req_id: Option<u64>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub result: Value,
    pub error: Option<AckError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangesFrame {
    pub collection: String,
    pub resume_token: Option<String>,
    #[serde(default)]
    pub data: ChangeBatch,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusFrame {
    pub data: StatusData,
}

#[derive(Debug, Clone)]
pub enum GatewayFrame {
    Ack(AckFrame),
    Changes(ChangesFrame),
    Heartbeat,
    Status(StatusFrame),
}

/// Parse a raw gateway frame
pub fn parse_frame(frame: &str) -> anyhow::Result<GatewayFrame> {
    let json: Value = serde_json::from_str(frame)?;

    // Responses echo the request method
    if json.get("method").is_some() || json.get("success").is_some() {
        let ack: AckFrame = serde_json::from_value(json)?;
        return Ok(GatewayFrame::Ack(ack));
    }

    match json.get("channel").and_then(|c| c.as_str()) {
        Some("changes") => Ok(GatewayFrame::Changes(serde_json::from_value(json)?)),
        Some("heartbeat") => Ok(GatewayFrame::Heartbeat),
        Some("status") => Ok(GatewayFrame::Status(serde_json::from_value(json)?)),
        Some(other) => Err(anyhow::anyhow!("Unknown channel: {}", other)),
        None => Err(anyhow::anyhow!("Frame missing 'channel' field")),
    }
}
