/*
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

//! Azure AD authentication for dnf repositories hosted on Azure Blob Storage.
//!
//! The core is [`plugin::AzureAuthPlugin::on_request`], which the host calls
//! for every outbound repository request; it attaches an
//! `Authorization: Bearer` header plus `x-ms-version` for repositories listed
//! in the plugin configuration.

// pub(crate) utilities
mod cmdutils;

pub mod azcli;
pub mod config;
pub mod fetch;
pub mod plugin;
pub mod repos;
pub mod token;
pub mod utils;

pub use azcli::AzureCli;
pub use config::PluginConfiguration;
pub use plugin::{AzureAuthPlugin, InjectionOutcome, RepositoryRequestContext};
pub use token::{Environment, ResolvedToken, TokenSource, TokenSourceKind};
