//! Resource naming. Every name is prefixed with the target environment.

use super::colour::Colour;

/// `{env}-{colour}-{app}`: release and Deployment of one colour
pub fn deployment_name(target_env: &str, colour: &Colour, app_name: &str) -> String {
    format!("{target_env}-{colour}-{app_name}")
}

/// `{env}-{app}-offline`: Service that always points at the idle colour
pub fn offline_service_name(target_env: &str, app_name: &str) -> String {
    format!("{target_env}-{app_name}-offline")
}

/// `{env}-service-{app}`: release owning the live and offline Services
pub fn service_release_name(target_env: &str, app_name: &str) -> String {
    format!("{target_env}-service-{app_name}")
}

/// `{env}-{app}`: release for charts deployed without colours
pub fn standard_release_name(target_env: &str, app_name: &str) -> String {
    format!("{target_env}-{app_name}")
}
