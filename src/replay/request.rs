// src/replay/request.rs

use serde::Deserialize;

use crate::config::{parse_duration, Algorithm, GatewayConfig};
use crate::error::{GatewayError, Result};
use crate::recording::TrafficRecord;
use crate::replay::ReplayOptions;

/// Body of `POST /api/replay` in its object form.
///
/// Zero or absent numbers keep the server's values; a negative speed is
/// ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReplayRequest {
    pub traffic: Vec<TrafficRecord>,
    pub algorithm: String,
    pub rate: i64,
    pub window: String,
    pub burst: i64,
    pub speed: f64,
    pub keys: Vec<String>,
    pub endpoints: Vec<String>,
}

impl ReplayRequest {
    /// Parses either a bare array of records or a request object, layering
    /// its overrides on the live limiter settings.
    ///
    /// Overridden settings must pass the same validation as the live
    /// configuration, backend constraints included.
    pub fn parse(body: &[u8], live: &GatewayConfig) -> Result<(ReplayOptions, Vec<TrafficRecord>)> {
        let trimmed = trim_whitespace(body);
        if trimmed.is_empty() {
            return Err(GatewayError::ReplayInput("request body is required".to_string()));
        }

        let mut options = ReplayOptions::new(live.limiter.clone());

        if trimmed.starts_with(b"[") {
            let records: Vec<TrafficRecord> = serde_json::from_slice(trimmed).map_err(|e| {
                GatewayError::ReplayInput(format!("decode replay traffic array: {}", e))
            })?;
            if records.is_empty() {
                return Err(empty_traffic());
            }
            return Ok((options, records));
        }

        let request: ReplayRequest = serde_json::from_slice(trimmed)
            .map_err(|e| GatewayError::ReplayInput(format!("decode replay request: {}", e)))?;

        let settings = &mut options.settings;
        if !request.algorithm.trim().is_empty() {
            settings.algorithm = request.algorithm.parse::<Algorithm>()?;
        }
        if request.rate > 0 {
            settings.rate = request.rate as u64;
        }
        if request.burst > 0 {
            settings.burst = request.burst as u64;
        }
        if !request.window.trim().is_empty() {
            settings.window = parse_duration("window", &request.window)?;
        }
        if request.speed >= 0.0 {
            options.speed = request.speed;
        }
        options.keys = request.keys;
        options.endpoints = request.endpoints;

        if request.traffic.is_empty() {
            return Err(empty_traffic());
        }
        options.validate()?;

        let mut checked = live.clone();
        checked.limiter = options.settings.clone();
        checked.validate()?;

        Ok((options, request.traffic))
    }
}

fn trim_whitespace(body: &[u8]) -> &[u8] {
    let start = body.iter().position(|b| !b.is_ascii_whitespace());
    let end = body.iter().rposition(|b| !b.is_ascii_whitespace());
    match (start, end) {
        (Some(start), Some(end)) => &body[start..=end],
        _ => &[],
    }
}

fn empty_traffic() -> GatewayError {
    GatewayError::ReplayInput("traffic records cannot be empty".to_string())
}
