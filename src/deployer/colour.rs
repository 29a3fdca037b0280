//! Colours and the offline colour lookup.

use super::context::Context;
use super::names::offline_service_name;
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

/// Selector label naming the colour behind a Service
pub const COLOUR_LABEL: &str = "colour";

/// A deployment colour
///
/// Blue and green are the usual pair, but whatever string the offline
/// service selector carries is used as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Colour(String);

impl Colour {
    pub fn new(name: impl Into<String>) -> Self {
        Colour(name.into())
    }

    pub fn blue() -> Self {
        Colour::new("blue")
    }

    pub fn green() -> Self {
        Colour::new("green")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Colour {
    fn default() -> Self {
        Colour::blue()
    }
}

impl fmt::Display for Colour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Colour named by a Service selector, if it names one
pub fn selector_colour(selector: Option<&BTreeMap<String, String>>) -> Option<Colour> {
    selector
        .and_then(|labels| labels.get(COLOUR_LABEL))
        .map(|c| Colour::new(c.as_str()))
}

/// Find the colour currently behind `{env}-{app}-offline`
///
/// The offline Service points at whichever colour is idle, which is the one
/// to deploy next. Falls back to the configured default colour when the
/// Service cannot be read, does not exist, has no selector, or has no colour
/// label. Never fails.
pub async fn resolve_offline_colour(ctx: &Context, target_env: &str, app_name: &str) -> Colour {
    let service = offline_service_name(target_env, app_name);
    let default = ctx.config.default_colour.clone();

    match ctx
        .cluster
        .service_selector(&ctx.config.namespace, &service)
        .await
    {
        Ok(selector) => match selector_colour(selector.as_ref()) {
            Some(colour) => {
                info!(service = %service, colour = %colour, "Resolved offline colour");
                colour
            }
            None => {
                info!(
                    service = %service,
                    colour = %default,
                    "Offline service selects no colour, using default"
                );
                default
            }
        },
        Err(e) => {
            info!(
                service = %service,
                colour = %default,
                error = %e,
                "Unable to read offline service (first deploy?), using default colour"
            );
            default
        }
    }
}
