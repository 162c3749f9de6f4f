use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::hns::{HnsAgent, HnsEntity, HnsOperation, HnsRequest};
use crate::{Error, Result};

/// Host network endpoint backing one pod interface. Only the identifier, IP
/// and policy list are modeled; everything else the agent put on the object
/// is carried in `extra` so a Modify rewrite round-trips it untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(rename = "ID", alias = "Id", default)]
    pub id: String,
    #[serde(rename = "IPAddress", default)]
    pub ip_address: String,
    #[serde(rename = "Policies", default)]
    pub policies: Vec<EndpointPolicy>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Redirect rule wire shape: traffic to IP:Port on the endpoint is proxied to
/// Destination instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyPolicy {
    #[serde(rename = "Type")]
    pub policy_type: String,
    #[serde(rename = "IP")]
    pub ip: String,
    #[serde(rename = "Port")]
    pub port: String,
    #[serde(rename = "Destination")]
    pub destination: String,
}

pub const POLICY_TYPE_PROXY: &str = "Proxy";

/// One entry of an endpoint's policy list. Endpoints carry policy kinds this
/// crate does not understand; those stay `Unknown` and re-serialize exactly as
/// they arrived so a whole-endpoint rewrite never drops them. A blob that
/// claims to be a proxy policy but fails to decode also stays `Unknown`.
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointPolicy {
    Proxy(ProxyPolicy),
    Unknown(Value),
}

impl EndpointPolicy {
    pub fn as_proxy(&self) -> Option<&ProxyPolicy> {
        match self {
            EndpointPolicy::Proxy(p) => Some(p),
            EndpointPolicy::Unknown(_) => None,
        }
    }
}

impl Serialize for EndpointPolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            EndpointPolicy::Proxy(p) => p.serialize(serializer),
            EndpointPolicy::Unknown(v) => v.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for EndpointPolicy {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if value.get("Type").and_then(Value::as_str) == Some(POLICY_TYPE_PROXY) {
            if let Ok(p) = serde_json::from_value::<ProxyPolicy>(value.clone()) {
                return Ok(EndpointPolicy::Proxy(p));
            }
        }
        Ok(EndpointPolicy::Unknown(value))
    }
}

/// Finds the endpoint whose IP matches `ip` by enumerating everything the
/// agent knows. No caching: the agent is the authority and the IP-to-id
/// mapping changes across pod restarts.
pub async fn resolve_endpoint_by_ip<A: HnsAgent>(agent: &A, ip: &str) -> Result<Endpoint> {
    if ip.is_empty() {
        return Err(Error::MissingIpAddress);
    }
    debug!("resolving endpoint for IP {ip}");

    let request = HnsRequest {
        entity: HnsEntity::EndpointV1,
        operation: HnsOperation::Enumerate,
        request: None,
    };
    let response = agent.invoke(request).await?;
    let endpoints: Vec<Endpoint> = serde_json::from_slice(&response)?;

    for endpoint in endpoints {
        if endpoint.ip_address == ip {
            info!("resolved endpoint {} for IP {ip}", endpoint.id);
            return Ok(endpoint);
        }
    }
    Err(Error::EndpointNotFound(ip.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_unknown_policy_round_trips() {
        let raw = r#"{"Type":"OutBoundNAT","Exceptions":["10.0.0.0/8"]}"#;
        let policy: EndpointPolicy = serde_json::from_str(raw).unwrap();
        assert!(matches!(policy, EndpointPolicy::Unknown(_)));

        let original: Value = serde_json::from_str(raw).unwrap();
        assert_eq!(serde_json::to_value(&policy).unwrap(), original);
    }

    #[test]
    fn test_proxy_policy_decodes() {
        let raw = r#"{"Type":"Proxy","IP":"169.254.169.254","Port":"80","Destination":"10.240.0.4:2579"}"#;
        let policy: EndpointPolicy = serde_json::from_str(raw).unwrap();
        let proxy = policy.as_proxy().unwrap();
        assert_eq!(proxy.ip, "169.254.169.254");
        assert_eq!(proxy.destination, "10.240.0.4:2579");
    }

    #[test]
    fn test_malformed_proxy_policy_stays_unknown() {
        // claims Proxy but the port is a number, not the string the shape wants
        let raw = r#"{"Type":"Proxy","IP":"169.254.169.254","Port":80}"#;
        let policy: EndpointPolicy = serde_json::from_str(raw).unwrap();
        assert!(matches!(policy, EndpointPolicy::Unknown(_)));

        let original: Value = serde_json::from_str(raw).unwrap();
        assert_eq!(serde_json::to_value(&policy).unwrap(), original);
    }

    #[test]
    fn test_endpoint_preserves_unmodeled_fields() {
        let raw = r#"{"ID":"ep-1","IPAddress":"10.244.0.7","Policies":[],"VirtualNetwork":"vnet-a","MacAddress":"00-15-5D-00-00-01"}"#;
        let endpoint: Endpoint = serde_json::from_str(raw).unwrap();
        assert_eq!(endpoint.id, "ep-1");

        let value = serde_json::to_value(&endpoint).unwrap();
        assert_eq!(value["VirtualNetwork"], "vnet-a");
        assert_eq!(value["MacAddress"], "00-15-5D-00-00-01");
    }
}
