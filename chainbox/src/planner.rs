//! Planner (spec §4.8): per-capability routing from name-patterns to remote
//! nodes with health tracking.

use crate::types::{MeshNode, Plan, Target};
use dashmap::DashMap;
use rand::seq::SliceRandom;
use regex::Regex;

struct Route {
    pattern: Regex,
    node_ids: Vec<String>,
}

pub struct Planner {
    nodes: DashMap<String, MeshNode>,
    routes: Vec<Route>,
}

impl Planner {
    pub fn new(nodes: impl IntoIterator<Item = (String, String)>, routes: Vec<(String, Vec<String>)>, now_ms: i64) -> Self {
        let table = DashMap::new();
        for (id, url) in nodes {
            table.insert(
                id.clone(),
                MeshNode {
                    id,
                    url,
                    healthy: true,
                    last_check: now_ms,
                },
            );
        }
        let routes = routes
            .into_iter()
            .filter_map(|(pattern, node_ids)| {
                Regex::new(&glob_to_regex(&pattern))
                    .ok()
                    .map(|pattern| Route { pattern, node_ids })
            })
            .collect();
        Self {
            nodes: table,
            routes,
        }
    }

    pub fn node_url(&self, node_id: &str) -> Option<String> {
        self.nodes.get(node_id).map(|n| n.url.clone())
    }

    fn healthy_subset(&self, ids: &[String]) -> Vec<String> {
        ids.iter()
            .filter(|id| self.nodes.get(*id).map(|n| n.healthy).unwrap_or(false))
            .cloned()
            .collect()
    }

    /// `plan` per spec §4.8: tenant node pool first, then first matching
    /// route's healthy node set, else `local`.
    pub fn plan(&self, fn_name: &str, node_pool: Option<&str>) -> Plan {
        if let Some(prefix) = node_pool {
            let ids: Vec<String> = self
                .nodes
                .iter()
                .filter(|n| n.id.starts_with(prefix) && n.healthy)
                .map(|n| n.id.clone())
                .collect();
            if let Some(node_id) = ids.choose(&mut rand::thread_rng()) {
                return self.remote_plan(node_id);
            }
        }

        for route in &self.routes {
            if route.pattern.is_match(fn_name) {
                let healthy = self.healthy_subset(&route.node_ids);
                if let Some(node_id) = healthy.choose(&mut rand::thread_rng()) {
                    return self.remote_plan(node_id);
                }
                // route matched but no healthy node: fall through to local
                // rather than silently trying a different route.
                return Plan {
                    target: Target::Local,
                    node_url: None,
                    node_id: None,
                };
            }
        }

        Plan {
            target: Target::Local,
            node_url: None,
            node_id: None,
        }
    }

    fn remote_plan(&self, node_id: &str) -> Plan {
        Plan {
            target: Target::Remote,
            node_url: self.node_url(node_id),
            node_id: Some(node_id.to_string()),
        }
    }

    pub fn mark_unhealthy(&self, node_id: &str, now_ms: i64) {
        if let Some(mut node) = self.nodes.get_mut(node_id) {
            node.healthy = false;
            node.last_check = now_ms;
        }
    }

    pub fn mark_healthy(&self, node_id: &str, now_ms: i64) {
        if let Some(mut node) = self.nodes.get_mut(node_id) {
            node.healthy = true;
            node.last_check = now_ms;
        }
    }
}

/// Dotted glob (`*` ↔ `.*`) to an anchored regex (spec §4.8).
fn glob_to_regex(pattern: &str) -> String {
    let escaped = regex::escape(pattern).replace("\\*", ".*");
    format!("^{escaped}$")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> Planner {
        Planner::new(
            [("compute".to_string(), "http://h:4000".to_string())],
            vec![("Heavy.*".to_string(), vec!["compute".to_string()])],
            0,
        )
    }

    #[test]
    fn routes_to_matching_node() {
        let p = planner();
        let plan = p.plan("Heavy.Crunch", None);
        assert_eq!(plan.target, Target::Remote);
        assert_eq!(plan.node_url.as_deref(), Some("http://h:4000"));
    }

    #[test]
    fn falls_back_to_local_when_no_route_matches() {
        let p = planner();
        let plan = p.plan("Light.Task", None);
        assert_eq!(plan.target, Target::Local);
    }

    #[test]
    fn unhealthy_node_excluded() {
        let p = planner();
        p.mark_unhealthy("compute", 0);
        let plan = p.plan("Heavy.Crunch", None);
        assert_eq!(plan.target, Target::Local);
        p.mark_healthy("compute", 1);
        let plan = p.plan("Heavy.Crunch", None);
        assert_eq!(plan.target, Target::Remote);
    }

    #[test]
    fn tenant_node_pool_takes_priority() {
        let planner = Planner::new(
            [
                ("acme-1".to_string(), "http://a1".to_string()),
                ("other".to_string(), "http://o".to_string()),
            ],
            vec![("Heavy.*".to_string(), vec!["other".to_string()])],
            0,
        );
        let plan = planner.plan("Heavy.Crunch", Some("acme-"));
        assert_eq!(plan.node_url.as_deref(), Some("http://a1"));
    }
}
