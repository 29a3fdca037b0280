//! Blue/green Helm release deployer
//!
//! Keeps two colour deployments of an application side by side, deploys the
//! idle colour, flips the live Service selector to it and then scales the
//! previously live colour down.

pub mod chart;
pub mod config;
pub mod deployer;
pub mod validation;
