use tracing::{debug, info};

use crate::Result;
use crate::hns::endpoint::{Endpoint, EndpointPolicy, POLICY_TYPE_PROXY, ProxyPolicy};
use crate::hns::{HnsAgent, HnsEntity, HnsOperation, HnsRequest};

/// Appends a proxy redirect for `listen_ip:listen_port` to the endpoint and
/// submits the whole endpoint back to the agent. Skipped entirely when a
/// redirect for `listen_ip` is already present.
///
/// The Modify is not atomic at the policy level: the full policy list is
/// rewritten, so a concurrent unrelated change to the same endpoint can be
/// lost. The redirector loop serializes every mutation for the pods it
/// manages, which is the only guard against that.
pub async fn apply_redirect<A: HnsAgent>(
    agent: &A,
    mut endpoint: Endpoint,
    listen_ip: &str,
    listen_port: &str,
    dest_ip: &str,
    dest_port: &str,
) -> Result<()> {
    if redirect_exists(&endpoint, listen_ip) {
        info!(
            "proxy redirect for {listen_ip} already on endpoint {}, skipping",
            endpoint.id
        );
        return Ok(());
    }

    let policy = ProxyPolicy {
        policy_type: POLICY_TYPE_PROXY.to_string(),
        ip: listen_ip.to_string(),
        port: listen_port.to_string(),
        destination: format!("{dest_ip}:{dest_port}"),
    };
    endpoint.policies.push(EndpointPolicy::Proxy(policy));

    info!("adding proxy redirect to endpoint {}", endpoint.id);
    modify_endpoint(agent, &endpoint).await
}

/// Removes the first proxy redirect whose listen IP equals `listen_ip`, then
/// submits the whole endpoint back to the agent. When no redirect matches the
/// rewrite still happens, making removal idempotent with respect to absence.
/// Policy kinds this crate does not decode are preserved untouched.
pub async fn remove_redirect<A: HnsAgent>(
    agent: &A,
    mut endpoint: Endpoint,
    listen_ip: &str,
) -> Result<()> {
    let index = endpoint
        .policies
        .iter()
        .position(|p| p.as_proxy().is_some_and(|proxy| proxy.ip == listen_ip));

    match index {
        Some(i) => {
            endpoint.policies.remove(i);
            info!("removing proxy redirect from endpoint {}", endpoint.id);
        }
        None => debug!(
            "no proxy redirect for {listen_ip} on endpoint {}, rewriting as-is",
            endpoint.id
        ),
    }

    modify_endpoint(agent, &endpoint).await
}

fn redirect_exists(endpoint: &Endpoint, listen_ip: &str) -> bool {
    endpoint
        .policies
        .iter()
        .any(|p| p.as_proxy().is_some_and(|proxy| proxy.ip == listen_ip))
}

async fn modify_endpoint<A: HnsAgent>(agent: &A, endpoint: &Endpoint) -> Result<()> {
    let request = HnsRequest {
        entity: HnsEntity::EndpointV1,
        operation: HnsOperation::Modify,
        request: Some(serde_json::to_value(endpoint)?),
    };
    agent.invoke(request).await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use serde_json::Value;

    use super::*;
    use crate::Result;

    /// Records every request and answers Enumerate with a canned endpoint
    /// list.
    struct MockAgent {
        endpoints: Value,
        requests: Mutex<Vec<HnsRequest>>,
    }

    impl MockAgent {
        fn new(endpoints: Value) -> Self {
            Self {
                endpoints,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn modified_endpoint(&self) -> Endpoint {
            let requests = self.requests.lock().unwrap();
            let modify = requests
                .iter()
                .rev()
                .find(|r| r.operation == HnsOperation::Modify)
                .expect("no modify request recorded");
            serde_json::from_value(modify.request.clone().unwrap()).unwrap()
        }

        fn modify_count(&self) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.operation == HnsOperation::Modify)
                .count()
        }
    }

    impl HnsAgent for MockAgent {
        async fn invoke(&self, req: HnsRequest) -> Result<Vec<u8>> {
            let out = match req.operation {
                HnsOperation::Enumerate => serde_json::to_vec(&self.endpoints).unwrap(),
                HnsOperation::Modify => Vec::new(),
            };
            self.requests.lock().unwrap().push(req);
            Ok(out)
        }
    }

    fn endpoint_with_policies(policies: &str) -> Endpoint {
        let raw = format!(
            r#"{{"ID":"ep-1","IPAddress":"10.244.0.7","Policies":{policies},"MacAddress":"00-15-5D-00-00-01"}}"#
        );
        serde_json::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn test_apply_adds_exactly_one_policy() {
        let agent = MockAgent::new(Value::Null);
        let endpoint = endpoint_with_policies(r#"[{"Type":"OutBoundNAT"}]"#);

        apply_redirect(&agent, endpoint, "169.254.169.254", "80", "10.240.0.4", "2579")
            .await
            .unwrap();

        let modified = agent.modified_endpoint();
        assert_eq!(modified.policies.len(), 2);
        let proxy = modified.policies[1].as_proxy().unwrap();
        assert_eq!(proxy.ip, "169.254.169.254");
        assert_eq!(proxy.port, "80");
        assert_eq!(proxy.destination, "10.240.0.4:2579");
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let agent = MockAgent::new(Value::Null);
        let endpoint = endpoint_with_policies(
            r#"[{"Type":"Proxy","IP":"169.254.169.254","Port":"80","Destination":"10.240.0.4:2579"}]"#,
        );

        apply_redirect(&agent, endpoint, "169.254.169.254", "80", "10.240.0.4", "2579")
            .await
            .unwrap();

        assert_eq!(agent.modify_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_deletes_only_the_matching_policy() {
        let agent = MockAgent::new(Value::Null);
        let endpoint = endpoint_with_policies(
            r#"[{"Type":"OutBoundNAT","Exceptions":["10.0.0.0/8"]},
                {"Type":"Proxy","IP":"169.254.169.254","Port":"80","Destination":"10.240.0.4:2579"},
                {"Type":"L4Proxy","SomeField":1}]"#,
        );
        let survivors: Vec<EndpointPolicy> = vec![
            endpoint.policies[0].clone(),
            endpoint.policies[2].clone(),
        ];

        remove_redirect(&agent, endpoint, "169.254.169.254")
            .await
            .unwrap();

        let modified = agent.modified_endpoint();
        assert_eq!(modified.policies, survivors);
    }

    #[tokio::test]
    async fn test_remove_of_absent_policy_rewrites_unchanged() {
        let agent = MockAgent::new(Value::Null);
        let endpoint = endpoint_with_policies(r#"[{"Type":"OutBoundNAT"}]"#);
        let before = endpoint.policies.clone();

        remove_redirect(&agent, endpoint, "169.254.169.254")
            .await
            .unwrap();

        assert_eq!(agent.modify_count(), 1);
        assert_eq!(agent.modified_endpoint().policies, before);
    }
}
