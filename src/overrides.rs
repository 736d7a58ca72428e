use itertools::Itertools;
use serde::Serialize;

use crate::eval::{Detail, Reason};
use crate::util::{contains_ignore_case, split_list};

pub const ENABLED_FEATURES_PARAM: &str = "enabledFeatures";
pub const DISABLED_FEATURES_PARAM: &str = "disabledFeatures";
pub const TOGGLED_FEATURES_PARAM: &str = "toggledFeatures";

/// The kind of query-string override that decided a gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OverrideKind {
    Enabled,
    Disabled,
    Toggled,
}

/// Request-scoped overrides taken from the `enabledFeatures`, `disabledFeatures` and
/// `toggledFeatures` query parameters.
///
/// Overrides are applied after every gate has been resolved. Toggles flip the computed value,
/// then enables force it on, then disables force it off, so a gate named in both the enabled and
/// the disabled list ends up off.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryOverrides {
    enabled: Vec<String>,
    disabled: Vec<String>,
    toggled: Vec<String>,
}

impl QueryOverrides {
    /// Builds overrides from the raw (comma separated) query values.
    pub fn from_query(enabled: Option<&str>, disabled: Option<&str>, toggled: Option<&str>) -> Self {
        QueryOverrides {
            enabled: parse_names(enabled),
            disabled: parse_names(disabled),
            toggled: parse_names(toggled),
        }
    }

    /// Builds overrides from decoded query pairs, picking out the three override parameters.
    /// Parameter names match case-insensitively and repeated parameters accumulate.
    pub fn from_query_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut enabled = Vec::new();
        let mut disabled = Vec::new();
        let mut toggled = Vec::new();
        for (key, value) in pairs {
            let target = if key.eq_ignore_ascii_case(ENABLED_FEATURES_PARAM) {
                &mut enabled
            } else if key.eq_ignore_ascii_case(DISABLED_FEATURES_PARAM) {
                &mut disabled
            } else if key.eq_ignore_ascii_case(TOGGLED_FEATURES_PARAM) {
                &mut toggled
            } else {
                continue;
            };
            target.extend(split_list(value).map(str::to_string));
        }
        QueryOverrides {
            enabled: dedup(enabled),
            disabled: dedup(disabled),
            toggled: dedup(toggled),
        }
    }

    pub fn enabled(&self) -> &[String] {
        &self.enabled
    }

    pub fn disabled(&self) -> &[String] {
        &self.disabled
    }

    pub fn toggled(&self) -> &[String] {
        &self.toggled
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty() && self.disabled.is_empty() && self.toggled.is_empty()
    }

    /// Every gate name mentioned by any override.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.enabled
            .iter()
            .chain(&self.disabled)
            .chain(&self.toggled)
            .map(String::as_str)
    }

    /// Layers the overrides for `gate_name` on top of a computed decision.
    pub fn apply(&self, gate_name: &str, computed: Detail) -> Detail {
        let mut detail = computed;
        if contains_ignore_case(&self.toggled, gate_name) {
            detail = Detail::overridden(!detail.value, OverrideKind::Toggled);
        }
        if contains_ignore_case(&self.enabled, gate_name) {
            detail = Detail::overridden(true, OverrideKind::Enabled);
        }
        if contains_ignore_case(&self.disabled, gate_name) {
            detail = Detail::overridden(false, OverrideKind::Disabled);
        }
        detail
    }
}

impl Detail {
    fn overridden(value: bool, kind: OverrideKind) -> Detail {
        Detail {
            value,
            reason: Reason::Overridden { kind },
        }
    }
}

fn parse_names(value: Option<&str>) -> Vec<String> {
    dedup(
        value
            .map(|v| split_list(v).map(str::to_string).collect())
            .unwrap_or_default(),
    )
}

fn dedup(names: Vec<String>) -> Vec<String> {
    names
        .into_iter()
        .unique_by(|name| name.to_lowercase())
        .collect()
}
