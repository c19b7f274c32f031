use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use domain::client::entity::ClientInfo;
use domain::common::entity::{MacAddr, TransportType};
use domain::ipv6::entity::Ipv6ForwardingRule;
use domain::upstream::entity::UpstreamInformation;
use serde::Deserialize;

use super::error::ApiError;
use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UpstreamRequest {
    pub if_index: u32,
    pub if_name: String,
    /// Absent on rawip interfaces.
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub ipv4_addr: Option<Ipv4Addr>,
    #[serde(default)]
    pub transport: TransportType,
    #[serde(default)]
    pub network_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct ClientRequest {
    pub downstream_if_index: u32,
    pub downstream_mac: String,
    pub client_addr: Ipv4Addr,
    pub client_mac: String,
}

#[derive(Debug, Deserialize)]
pub struct Ipv6RuleRequest {
    pub upstream_if_index: u32,
    pub downstream_if_index: u32,
    pub neighbor: Ipv6Addr,
    pub downstream_mac: String,
    pub neighbor_mac: String,
}

#[derive(Debug, Deserialize)]
pub struct MoveRulesRequest {
    /// `0` removes the rules without re-adding them.
    pub upstream_if_index: u32,
}

fn parse_mac(field: &str, value: &str) -> Result<MacAddr, ApiError> {
    MacAddr::from_str(value).map_err(|message| ApiError::BadRequest {
        code: "VALIDATION_ERROR",
        message: format!("{field}: {message}"),
    })
}

fn require_index(field: &str, value: u32) -> Result<(), ApiError> {
    if value == 0 {
        return Err(ApiError::BadRequest {
            code: "VALIDATION_ERROR",
            message: format!("{field} must be non-zero"),
        });
    }
    Ok(())
}

impl UpstreamRequest {
    fn into_domain(self) -> Result<UpstreamInformation, ApiError> {
        require_index("if_index", self.if_index)?;
        if self.if_name.is_empty() {
            return Err(ApiError::BadRequest {
                code: "VALIDATION_ERROR",
                message: "if_name must not be empty".to_string(),
            });
        }
        let mac = self.mac.as_deref().map(|m| parse_mac("mac", m)).transpose()?;
        Ok(UpstreamInformation {
            if_index: self.if_index,
            if_name: self.if_name,
            mac,
            ipv4_addr: self.ipv4_addr,
            transport: self.transport,
            network_id: self.network_id,
        })
    }
}

impl ClientRequest {
    fn into_domain(self) -> Result<ClientInfo, ApiError> {
        require_index("downstream_if_index", self.downstream_if_index)?;
        Ok(ClientInfo {
            downstream_if_index: self.downstream_if_index,
            downstream_mac: parse_mac("downstream_mac", &self.downstream_mac)?,
            client_addr: self.client_addr,
            client_mac: parse_mac("client_mac", &self.client_mac)?,
        })
    }
}

impl Ipv6RuleRequest {
    fn into_domain(self) -> Result<Ipv6ForwardingRule, ApiError> {
        require_index("upstream_if_index", self.upstream_if_index)?;
        require_index("downstream_if_index", self.downstream_if_index)?;
        Ok(Ipv6ForwardingRule {
            upstream_if_index: self.upstream_if_index,
            downstream_if_index: self.downstream_if_index,
            neighbor: self.neighbor,
            downstream_mac: parse_mac("downstream_mac", &self.downstream_mac)?,
            neighbor_mac: parse_mac("neighbor_mac", &self.neighbor_mac)?,
        })
    }
}

pub async fn put_upstream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpstreamRequest>,
) -> Result<StatusCode, ApiError> {
    let upstream = req.into_domain()?;
    state.coordinator()?.set_upstream(Some(upstream)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_upstream(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.coordinator()?.set_upstream(None).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn post_client(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClientRequest>,
) -> Result<StatusCode, ApiError> {
    let info = req.into_domain()?;
    state.coordinator()?
        .add_client(info.downstream_if_index, info)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_client(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClientRequest>,
) -> Result<StatusCode, ApiError> {
    let info = req.into_domain()?;
    state.coordinator()?
        .remove_client(info.downstream_if_index, info)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn post_ipv6_rule(
    State(state): State<Arc<AppState>>,
    Json(req): Json<Ipv6RuleRequest>,
) -> Result<StatusCode, ApiError> {
    let rule = req.into_domain()?;
    state.coordinator()?.add_ipv6_rule(rule).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_ipv6_rule(
    State(state): State<Arc<AppState>>,
    Json(req): Json<Ipv6RuleRequest>,
) -> Result<StatusCode, ApiError> {
    let rule = req.into_domain()?;
    state.coordinator()?.remove_ipv6_rule(rule).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Move a downstream's IPv6 rules to another upstream.
pub async fn put_ipv6_rules_upstream(
    State(state): State<Arc<AppState>>,
    Path(downstream): Path<u32>,
    Json(req): Json<MoveRulesRequest>,
) -> Result<StatusCode, ApiError> {
    require_index("downstream", downstream)?;
    state
        .coordinator()?
        .update_ipv6_rules(downstream, req.upstream_if_index)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_ipv6_rules(
    State(state): State<Arc<AppState>>,
    Path(downstream): Path<u32>,
) -> Result<StatusCode, ApiError> {
    require_index("downstream", downstream)?;
    state.coordinator()?.clear_ipv6_rules(downstream).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_clients(
    State(state): State<Arc<AppState>>,
    Path(downstream): Path<u32>,
) -> Result<StatusCode, ApiError> {
    require_index("downstream", downstream)?;
    state.coordinator()?.clear_clients(downstream).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_request_parses_optional_fields() {
        let req: UpstreamRequest =
            serde_json::from_str(r#"{"if_index":7,"if_name":"rmnet0","transport":"cellular"}"#)
                .unwrap();
        let upstream = req.into_domain().unwrap();
        assert_eq!(upstream.mac, None);
        assert_eq!(upstream.ipv4_addr, None);
        assert_eq!(upstream.transport, TransportType::Cellular);
    }

    #[test]
    fn upstream_request_rejects_zero_index() {
        let req: UpstreamRequest =
            serde_json::from_str(r#"{"if_index":0,"if_name":"rmnet0"}"#).unwrap();
        assert!(matches!(req.into_domain(), Err(ApiError::BadRequest { .. })));
    }

    #[test]
    fn client_request_rejects_bad_mac() {
        let req: ClientRequest = serde_json::from_str(
            r#"{"downstream_if_index":20,"downstream_mac":"02:00:00:00:00:14","client_addr":"192.168.42.10","client_mac":"zz"}"#,
        )
        .unwrap();
        let Err(ApiError::BadRequest { message, .. }) = req.into_domain() else {
            panic!("expected validation error");
        };
        assert!(message.starts_with("client_mac"));
    }

    #[test]
    fn ipv6_rule_request_converts() {
        let req: Ipv6RuleRequest = serde_json::from_str(
            r#"{"upstream_if_index":7,"downstream_if_index":20,"neighbor":"2001:db8::10","downstream_mac":"02:00:00:00:00:14","neighbor_mac":"02:00:00:00:00:99"}"#,
        )
        .unwrap();
        let rule = req.into_domain().unwrap();
        assert_eq!(rule.neighbor, "2001:db8::10".parse::<Ipv6Addr>().unwrap());
        assert_eq!(rule.neighbor_mac, MacAddr([2, 0, 0, 0, 0, 0x99]));
    }
}
