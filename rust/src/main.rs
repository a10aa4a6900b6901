//! The main CLI logic.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use termcolor::WriteColor;

use dnf_azure_auth::config::DEFAULT_CONFIG_PATH;
use dnf_azure_auth::repos::YUM_REPOS_D;
use dnf_azure_auth::{
    fetch, repos, token, AzureAuthPlugin, AzureCli, Environment, InjectionOutcome,
    PluginConfiguration, RepositoryRequestContext,
};

const LONG_ABOUT: &str = indoc::indoc! {r#"
Azure AD authentication for dnf repositories on Azure Blob Storage.

Repositories listed as sections of the plugin configuration get an
`Authorization: Bearer` header. The token is taken from
DNF_PLUGIN_AZURE_AUTH_TOKEN if set, otherwise from `az account
get-access-token`, run as $SUDO_USER first when invoked via sudo."#};

#[derive(Debug, Parser)]
#[clap(
    name = "dnf-azure-auth",
    about = "Azure AD authentication for dnf repositories on Azure Blob Storage",
    long_about = LONG_ABOUT,
    version
)]
#[clap(rename_all = "kebab-case")]
struct Opt {
    /// Plugin configuration file
    #[clap(global = true, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[clap(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, clap::Subcommand)]
#[clap(rename_all = "kebab-case")]
enum Cmd {
    /// Print the headers that would be added to a request for a repository
    Headers {
        /// Repository id
        repo: String,
        /// Request URL, only used for diagnostics
        #[clap(long, default_value = "")]
        url: String,
    },
    /// Print a bearer token for Azure Storage
    Token,
    /// Show the plugin configuration and the managed repositories
    Status {
        /// Directory holding .repo files
        #[clap(long, default_value = YUM_REPOS_D)]
        reposdir: PathBuf,
    },
    /// Download a file from a managed repository
    Fetch {
        /// Repository id
        repo: String,
        /// Path relative to the repository baseurl, e.g. repodata/repomd.xml
        path: String,
        /// Write to this file instead of stdout
        #[clap(long, short = 'o')]
        output: Option<PathBuf>,
        /// Directory holding .repo files
        #[clap(long, default_value = YUM_REPOS_D)]
        reposdir: PathBuf,
        /// Value substituted for $releasever in the baseurl
        #[clap(long)]
        releasever: Option<String>,
    },
}

fn new_plugin(config: PluginConfiguration) -> AzureAuthPlugin<AzureCli> {
    let az = AzureCli::new(config.token_timeout());
    AzureAuthPlugin::new(config, Environment::from_process(), az)
}

fn headers(config: PluginConfiguration, repo: &str, url: &str) -> Result<i32> {
    let plugin = new_plugin(config);
    let mut req = RepositoryRequestContext::new(repo, url);
    match plugin.on_request(&mut req) {
        InjectionOutcome::Injected(_) => {
            let mut stdout = std::io::stdout().lock();
            for (name, value) in req.headers.iter() {
                let value = value.to_str().context("Non-ASCII header value")?;
                writeln!(stdout, "{name}: {value}")?;
            }
            Ok(0)
        }
        InjectionOutcome::Disabled => {
            eprintln!("azure_auth is disabled");
            Ok(0)
        }
        InjectionOutcome::Unmanaged => {
            eprintln!("Repository {repo} is not managed by azure_auth");
            Ok(0)
        }
        // Already logged at warning level
        InjectionOutcome::Failed(_) => Ok(1),
    }
}

fn print_token(config: &PluginConfiguration) -> Result<i32> {
    let az = AzureCli::new(config.token_timeout());
    let t = token::resolve_token(&Environment::from_process(), &az)?;
    eprintln!("Token source: {}", t.source);
    println!("{}", t.value);
    Ok(0)
}

fn status(config: &PluginConfiguration, reposdir: &std::path::Path) -> Result<i32> {
    println!(
        "azure_auth: {}",
        if config.enabled() { "enabled" } else { "disabled" }
    );
    let defined = match repos::all(reposdir) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("{e:#}");
            Vec::new()
        }
    };
    for id in config.managed_repository_ids() {
        let state = match defined.iter().find(|r| &r.id == id) {
            Some(r) if r.enabled => "enabled",
            Some(_) => "disabled",
            None => "not defined",
        };
        println!("  {id}: {state}");
    }
    Ok(0)
}

fn fetch_cmd(
    config: PluginConfiguration,
    repo: &str,
    path: &str,
    output: Option<&std::path::Path>,
    reposdir: &std::path::Path,
    releasever: Option<&str>,
) -> Result<i32> {
    let def = repos::find(reposdir, repo)?
        .ok_or_else(|| anyhow!("Repository {repo} not found in {}", reposdir.display()))?;
    let base = def
        .baseurl(releasever)
        .ok_or_else(|| anyhow!("Repository {repo} has no baseurl"))?;
    let url = fetch::join_url(&base, path);
    let plugin = new_plugin(config);
    let outcome = match output {
        Some(dest) => fetch::fetch_to_file(&plugin, repo, &url, dest)?,
        None => fetch::fetch(&plugin, repo, &url, &mut std::io::stdout().lock())?,
    };
    tracing::debug!("Fetched {url}: {outcome:?}");
    Ok(0)
}

/// The real main function returns a `Result<>`.
fn inner_main() -> Result<i32> {
    // Initialize failpoints
    let _scenario = fail::FailScenario::setup();
    // We need to write to stderr, because some of our commands write to stdout
    // like `dnf-azure-auth headers`.
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    tracing::trace!("starting");
    let opt = Opt::parse();
    let config = PluginConfiguration::load_or_disabled(&opt.config);
    match opt.cmd {
        Cmd::Headers { repo, url } => headers(config, &repo, &url),
        Cmd::Token => print_token(&config),
        Cmd::Status { reposdir } => status(&config, &reposdir),
        Cmd::Fetch {
            repo,
            path,
            output,
            reposdir,
            releasever,
        } => fetch_cmd(
            config,
            &repo,
            &path,
            output.as_deref(),
            &reposdir,
            releasever.as_deref(),
        ),
    }
}

fn print_error(e: anyhow::Error) {
    let msg = format!("{:#}", e);
    // Print the error: prefix in red if we're on a tty
    let stderr = termcolor::BufferWriter::stderr(termcolor::ColorChoice::Auto);
    let stderrbuf = {
        let mut stderrbuf = stderr.buffer();
        let _ =
            stderrbuf.set_color(termcolor::ColorSpec::new().set_fg(Some(termcolor::Color::Red)));
        let _ = write!(&mut stderrbuf, "error: ");
        let _ = stderrbuf.reset();
        let _ = writeln!(&mut stderrbuf, "{}", msg);
        stderrbuf
    };
    let _ = stderr.print(&stderrbuf);
}

fn main() {
    match inner_main() {
        Ok(e) => std::process::exit(e),
        Err(e) => {
            print_error(e);
            std::process::exit(1)
        }
    }
}
