// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Forced token acquisition failures via the `azure-auth::acquire` failpoint.

use anyhow::Result;
use dnf_azure_auth::{
    AzureAuthPlugin, Environment, InjectionOutcome, PluginConfiguration,
    RepositoryRequestContext, TokenSource,
};

struct Never;

impl TokenSource for Never {
    fn resolve(&self, _audience: &str, _as_user: Option<&str>) -> Result<String> {
        panic!("token source must not be reached")
    }
}

#[test]
fn acquire_failpoint() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("azure-auth::acquire", "return").unwrap();

    let config = PluginConfiguration::parse("[main]\nenabled=1\n[azure-rpm-repo]\n").unwrap();
    let plugin = AzureAuthPlugin::new(config.clone(), Environment::default(), Never);
    let mut req = RepositoryRequestContext::new("azure-rpm-repo", "https://example.invalid/");
    assert!(matches!(
        plugin.on_request(&mut req),
        InjectionOutcome::Failed(_)
    ));
    assert!(req.headers.is_empty());

    // The override is consulted before the failpoint
    let env = Environment {
        override_token: Some("zzz999".into()),
        ..Default::default()
    };
    let plugin = AzureAuthPlugin::new(config, env, Never);
    assert!(plugin.on_request(&mut req).is_injected());

    scenario.teardown();
}
