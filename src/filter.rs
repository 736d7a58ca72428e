use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, OneOrMany};

use crate::context::RequestContext;
use crate::ip_range::IpRangeProvider;
use crate::rollout;
use crate::util::contains_ignore_case;

/// A rule attached to a gate. A gate is active only if every one of its filters passes.
///
/// The set of filter kinds is closed; evaluation matches on it exhaustively.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Filter {
    Campaign(CampaignSettings),
    Environment(EnvironmentSettings),
    IpAddress(IpAddressSettings),
    Parent(ParentSettings),
    Rollout(RolloutSettings),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterKind {
    Campaign,
    Environment,
    IpAddress,
    Parent,
    Rollout,
}

impl Filter {
    pub fn kind(&self) -> FilterKind {
        match self {
            Filter::Campaign(_) => FilterKind::Campaign,
            Filter::Environment(_) => FilterKind::Environment,
            Filter::IpAddress(_) => FilterKind::IpAddress,
            Filter::Parent(_) => FilterKind::Parent,
            Filter::Rollout(_) => FilterKind::Rollout,
        }
    }
}

/// Everything a filter may look at while deciding one gate for one request.
///
/// Request-wide values (customer id, client address, effective environment) are resolved once
/// per request and shared by every gate.
pub struct FilterContext<'a> {
    pub request: &'a RequestContext,
    pub gate_name: &'a str,
    pub customer_id: Option<&'a str>,
    pub client_ip: Option<IpAddr>,
    pub environment: Option<&'a str>,
    pub ip_ranges: &'a dyn IpRangeProvider,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSettings {
    #[serde(default)]
    pub enabled: Vec<String>,
    #[serde(default)]
    pub disabled: Vec<String>,
}

impl CampaignSettings {
    /// A disabled campaign always wins. With no enabled campaigns configured there is no
    /// restriction; otherwise one of the request's campaigns must be enabled.
    pub fn evaluate(&self, ctx: &FilterContext) -> bool {
        let campaigns = ctx.request.campaigns();
        if campaigns
            .iter()
            .any(|c| contains_ignore_case(&self.disabled, c))
        {
            return false;
        }
        if self.enabled.is_empty() {
            return true;
        }
        campaigns
            .iter()
            .any(|c| contains_ignore_case(&self.enabled, c))
    }
}

#[serde_as]
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSettings {
    #[serde_as(as = "OneOrMany<_>")]
    #[serde(default)]
    pub environments: Vec<String>,
}

impl EnvironmentSettings {
    /// An empty list places no restriction. Otherwise the effective environment must be listed.
    pub fn evaluate(&self, ctx: &FilterContext) -> bool {
        if self.environments.is_empty() {
            return true;
        }
        match ctx.environment {
            Some(environment) => contains_ignore_case(&self.environments, environment),
            None => false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IpAddressSettings {
    pub allowed_range: String,
}

impl IpAddressSettings {
    /// Fails closed: an unknown range name or an unknown client address never passes.
    pub fn evaluate(&self, ctx: &FilterContext) -> bool {
        let client_ip = match ctx.client_ip {
            Some(ip) => ip,
            None => return false,
        };
        match ctx.ip_ranges.ip_ranges(&self.allowed_range) {
            Some(ranges) => ranges.iter().any(|range| range.contains(&client_ip)),
            None => false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParentSettings {
    /// Name of the gate that must be active. Resolved against the snapshot at evaluation time.
    #[serde(alias = "parent")]
    pub gate: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RolloutSettings {
    pub exposure_percentage: u32,
}

impl RolloutSettings {
    pub fn evaluate(&self, ctx: &FilterContext) -> bool {
        rollout::is_exposed(ctx.gate_name, ctx.customer_id, self.exposure_percentage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip_range::{EmptyIpRangeProvider, StaticIpRangeProvider};
    use spectral::prelude::*;
    use test_case::test_case;

    fn filter_context<'a>(
        request: &'a RequestContext,
        ip_ranges: &'a dyn IpRangeProvider,
    ) -> FilterContext<'a> {
        FilterContext {
            request,
            gate_name: "gate",
            customer_id: request.customer_id(),
            client_ip: request.client_ip(true),
            environment: request.environment(),
            ip_ranges,
        }
    }

    fn campaign(enabled: &[&str], disabled: &[&str]) -> CampaignSettings {
        CampaignSettings {
            enabled: enabled.iter().map(|s| s.to_string()).collect(),
            disabled: disabled.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn parses_every_filter_kind() {
        let filters: Vec<Filter> = serde_json::from_str(
            r#"[
                {"kind": "campaign", "enabled": ["spring"]},
                {"kind": "environment", "environments": "Prod"},
                {"kind": "ipAddress", "allowedRange": "corpnet"},
                {"kind": "parent", "gate": "base"},
                {"kind": "parent", "parent": "legacy"},
                {"kind": "rollout", "exposurePercentage": 25}
            ]"#,
        )
        .unwrap();

        assert_that!(filters.iter().map(Filter::kind).collect::<Vec<_>>()).is_equal_to(vec![
            FilterKind::Campaign,
            FilterKind::Environment,
            FilterKind::IpAddress,
            FilterKind::Parent,
            FilterKind::Parent,
            FilterKind::Rollout,
        ]);
        assert_that!(filters[0]).is_equal_to(Filter::Campaign(campaign(&["spring"], &[])));
        assert_that!(filters[1]).is_equal_to(Filter::Environment(EnvironmentSettings {
            environments: vec!["Prod".to_string()],
        }));
        assert_that!(filters[4]).is_equal_to(Filter::Parent(ParentSettings {
            gate: "legacy".to_string(),
        }));
    }

    #[test]
    fn rejects_unknown_filter_kind() {
        let result: Result<Filter, _> = serde_json::from_str(r#"{"kind": "moonPhase"}"#);
        assert_that!(result).is_err();
    }

    #[test_case(&[], &[], "", true ; "no campaign and no restriction")]
    #[test_case(&[], &[], "spring", true ; "campaign with no restriction")]
    #[test_case(&["spring"], &[], "spring", true ; "enabled campaign")]
    #[test_case(&["spring"], &[], "SPRING", true ; "enabled campaign ignores case")]
    #[test_case(&["spring"], &[], "summer", false ; "campaign not enabled")]
    #[test_case(&["spring"], &[], "", false ; "no campaign when one is required")]
    #[test_case(&["spring"], &["spring"], "spring", false ; "disabled wins over enabled")]
    #[test_case(&[], &["spring"], "spring", false ; "disabled campaign")]
    #[test_case(&[], &["spring"], "", true ; "no campaign with only disabled list")]
    #[test_case(&["spring"], &["summer"], "spring,summer", false ; "any disabled campaign wins")]
    fn campaign_filter(enabled: &[&str], disabled: &[&str], request: &str, expected: bool) {
        let request = RequestContext::builder().campaign(request).build();
        let ctx = filter_context(&request, &EmptyIpRangeProvider);
        assert_eq!(campaign(enabled, disabled).evaluate(&ctx), expected);
    }

    #[test_case(&[], None, true ; "empty list without environment")]
    #[test_case(&[], Some("Dev"), true ; "empty list with environment")]
    #[test_case(&["Prod"], Some("Dev"), false ; "environment not listed")]
    #[test_case(&["Prod"], Some("PROD"), true ; "listed ignoring case")]
    #[test_case(&["Prod", "PPE"], Some("ppe"), true ; "any listed environment")]
    #[test_case(&["Prod"], None, false ; "no environment when one is required")]
    fn environment_filter(environments: &[&str], environment: Option<&str>, expected: bool) {
        let request = RequestContext::builder().build();
        let mut ctx = filter_context(&request, &EmptyIpRangeProvider);
        ctx.environment = environment;
        let settings = EnvironmentSettings {
            environments: environments.iter().map(|s| s.to_string()).collect(),
        };
        assert_eq!(settings.evaluate(&ctx), expected);
    }

    #[test_case("corpnet", "10.1.2.3", true ; "inside range")]
    #[test_case("CORPNET", "10.1.2.3", true ; "range name ignores case")]
    #[test_case("corpnet", "203.0.113.9", false ; "outside range")]
    #[test_case("unknown", "10.1.2.3", false ; "unknown range fails closed")]
    fn ip_address_filter(range: &str, client: &str, expected: bool) {
        let provider = StaticIpRangeProvider::from_json_str(r#"{"corpnet": ["10.0.0.0/8"]}"#)
            .unwrap();
        let request = RequestContext::builder().forwarded_for(client).build();
        let ctx = filter_context(&request, &provider);
        let settings = IpAddressSettings {
            allowed_range: range.to_string(),
        };
        assert_eq!(settings.evaluate(&ctx), expected);
    }

    #[test]
    fn ip_address_filter_without_client_address_fails() {
        let provider = StaticIpRangeProvider::from_json_str(r#"{"any": ["0.0.0.0/0"]}"#).unwrap();
        let request = RequestContext::builder().build();
        let ctx = filter_context(&request, &provider);
        let settings = IpAddressSettings {
            allowed_range: "any".to_string(),
        };
        assert_that!(settings.evaluate(&ctx)).is_false();
    }

    #[test]
    fn ip_address_filter_with_empty_provider_always_fails() {
        let request = RequestContext::builder()
            .remote_addr("10.1.2.3".parse().unwrap())
            .build();
        let ctx = filter_context(&request, &EmptyIpRangeProvider);
        let settings = IpAddressSettings {
            allowed_range: "corpnet".to_string(),
        };
        assert_that!(settings.evaluate(&ctx)).is_false();
    }

    #[test]
    fn rollout_filter_uses_gate_and_customer() {
        let request = RequestContext::builder().customer_id("customer-1").build();
        let ctx = filter_context(&request, &EmptyIpRangeProvider);
        let bucket = rollout::bucket("gate", "customer-1");

        let below = RolloutSettings {
            exposure_percentage: bucket,
        };
        let above = RolloutSettings {
            exposure_percentage: bucket + 1,
        };
        assert_that!(below.evaluate(&ctx)).is_false();
        assert_that!(above.evaluate(&ctx)).is_true();
    }
}
