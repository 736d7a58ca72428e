use crate::context::RequestContext;

/// Supplies the stable identity that rollout bucketing is keyed on.
pub trait CustomerIdProvider: Send + Sync {
    fn customer_id(&self, context: &RequestContext) -> Option<String>;
}

/// Uses the authenticated customer id of the request.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContextCustomerIdProvider;

impl CustomerIdProvider for ContextCustomerIdProvider {
    fn customer_id(&self, context: &RequestContext) -> Option<String> {
        context.customer_id().map(str::to_string)
    }
}

/// Uses the anonymous (device or cookie) id of the request.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnonymousIdProvider;

impl CustomerIdProvider for AnonymousIdProvider {
    fn customer_id(&self, context: &RequestContext) -> Option<String> {
        context.anonymous_id().map(str::to_string)
    }
}

/// Asks each provider in turn and returns the first non-empty id.
#[derive(Default)]
pub struct ChainedCustomerIdProvider {
    providers: Vec<Box<dyn CustomerIdProvider>>,
}

impl ChainedCustomerIdProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: impl CustomerIdProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }
}

impl CustomerIdProvider for ChainedCustomerIdProvider {
    fn customer_id(&self, context: &RequestContext) -> Option<String> {
        self.providers
            .iter()
            .filter_map(|provider| provider.customer_id(context))
            .find(|id| !id.is_empty())
    }
}

/// The authenticated id when there is one, otherwise the anonymous id.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultCustomerIdProvider;

impl CustomerIdProvider for DefaultCustomerIdProvider {
    fn customer_id(&self, context: &RequestContext) -> Option<String> {
        ContextCustomerIdProvider
            .customer_id(context)
            .or_else(|| AnonymousIdProvider.customer_id(context))
    }
}
