use std::net::{IpAddr, SocketAddr};

use itertools::Itertools;
use log::warn;

use crate::overrides::QueryOverrides;
use crate::util::split_list;

/// RequestContext carries everything the host knows about the current request that gate
/// evaluation may depend on. It is built once per request with [RequestContextBuilder] and is
/// never mutated by evaluation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestContext {
    customer_id: Option<String>,
    anonymous_id: Option<String>,
    market: Option<String>,
    environment: Option<String>,
    campaigns: Vec<String>,
    forwarded_for: Vec<String>,
    remote_addr: Option<IpAddr>,
    partner: Option<String>,
    platform: Option<String>,
    overrides: QueryOverrides,
}

impl RequestContext {
    /// Create a new [RequestContextBuilder].
    pub fn builder() -> RequestContextBuilder {
        RequestContextBuilder::new()
    }

    /// The authenticated customer identifier, if any.
    pub fn customer_id(&self) -> Option<&str> {
        self.customer_id.as_deref()
    }

    /// An anonymous or device identifier, used when no customer identifier exists.
    pub fn anonymous_id(&self) -> Option<&str> {
        self.anonymous_id.as_deref()
    }

    pub fn market(&self) -> Option<&str> {
        self.market.as_deref()
    }

    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    /// Campaign names taken from the `campaign` query parameter.
    pub fn campaigns(&self) -> &[String] {
        &self.campaigns
    }

    /// The `X-Forwarded-For` chain, client first.
    pub fn forwarded_for(&self) -> &[String] {
        &self.forwarded_for
    }

    pub fn remote_addr(&self) -> Option<IpAddr> {
        self.remote_addr
    }

    pub fn partner(&self) -> Option<&str> {
        self.partner.as_deref()
    }

    pub fn platform(&self) -> Option<&str> {
        self.platform.as_deref()
    }

    pub fn overrides(&self) -> &QueryOverrides {
        &self.overrides
    }

    /// Returns the address of the calling client.
    ///
    /// When the forwarded-for chain is trusted the first entry that parses as an address wins;
    /// otherwise, or if no entry parses, the address of the direct connection is used.
    pub fn client_ip(&self, trust_forwarded_for: bool) -> Option<IpAddr> {
        if trust_forwarded_for {
            for entry in &self.forwarded_for {
                match parse_forwarded_entry(entry) {
                    Some(ip) => return Some(ip),
                    None => warn!("ignoring unparseable X-Forwarded-For entry '{}'", entry),
                }
            }
        }
        self.remote_addr
    }
}

fn parse_forwarded_entry(entry: &str) -> Option<IpAddr> {
    let entry = entry.trim();
    if let Ok(ip) = entry.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Ok(socket) = entry.parse::<SocketAddr>() {
        return Some(socket.ip());
    }
    // Bracketed IPv6 without a port.
    let unbracketed = entry.trim_start_matches('[').trim_end_matches(']');
    unbracketed.parse::<IpAddr>().ok()
}

/// Contains methods for configuring a [RequestContext].
///
/// Header and query values can be passed through as the host received them: list-valued inputs
/// are split on commas and trimmed.
#[derive(Clone, Debug, Default)]
pub struct RequestContextBuilder {
    context: RequestContext,
}

impl RequestContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn customer_id(&mut self, customer_id: impl Into<String>) -> &mut Self {
        self.context.customer_id = non_empty(customer_id.into());
        self
    }

    pub fn anonymous_id(&mut self, anonymous_id: impl Into<String>) -> &mut Self {
        self.context.anonymous_id = non_empty(anonymous_id.into());
        self
    }

    pub fn market(&mut self, market: impl Into<String>) -> &mut Self {
        self.context.market = non_empty(market.into());
        self
    }

    pub fn environment(&mut self, environment: impl Into<String>) -> &mut Self {
        self.context.environment = non_empty(environment.into());
        self
    }

    /// Adds the campaigns named by a `campaign` query value. May be called more than once.
    pub fn campaign(&mut self, campaign: &str) -> &mut Self {
        let campaigns = self
            .context
            .campaigns
            .drain(..)
            .chain(split_list(campaign).map(str::to_string))
            .unique_by(|c| c.to_lowercase())
            .collect::<Vec<_>>();
        self.context.campaigns = campaigns;
        self
    }

    /// Appends the entries of an `X-Forwarded-For` header value.
    pub fn forwarded_for(&mut self, header_value: &str) -> &mut Self {
        self.context
            .forwarded_for
            .extend(split_list(header_value).map(str::to_string));
        self
    }

    pub fn remote_addr(&mut self, remote_addr: IpAddr) -> &mut Self {
        self.context.remote_addr = Some(remote_addr);
        self
    }

    pub fn partner(&mut self, partner: impl Into<String>) -> &mut Self {
        self.context.partner = non_empty(partner.into());
        self
    }

    pub fn platform(&mut self, platform: impl Into<String>) -> &mut Self {
        self.context.platform = non_empty(platform.into());
        self
    }

    pub fn overrides(&mut self, overrides: QueryOverrides) -> &mut Self {
        self.context.overrides = overrides;
        self
    }

    pub fn build(&self) -> RequestContext {
        self.context.clone()
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == value.len() {
        Some(value)
    } else {
        Some(trimmed.to_string())
    }
}
