//! AddRepo: register a chart repository, optionally with client/CA certificates.

use std::io::Write;

use base64::{engine::general_purpose::STANDARD, Engine};
use hoist_apply::HelmCommand;
use hoist_core::{HoistError, HoistResult};
use tracing::debug;

use crate::{Operation, StepContext};

/// `name=url`, as given in the repo list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSpec {
    pub name: String,
    pub url: String,
}

impl std::str::FromStr for RepoSpec {
    type Err = HoistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(HoistError::validation("repo is required"));
        }
        match s.split_once('=') {
            Some((name, url)) if !name.trim().is_empty() && !url.trim().is_empty() => {
                Ok(Self { name: name.trim().to_string(), url: url.trim().to_string() })
            }
            _ => Err(HoistError::validation(format!("bad repo spec '{}'", s))),
        }
    }
}

/// Repository certificates given base64-encoded. Decoded during prepare, written to
/// temporary files during execute.
#[derive(Debug, Clone, Default)]
pub struct RepoCerts {
    cert: Option<String>,
    ca_cert: Option<String>,
    decoded_cert: Option<Vec<u8>>,
    decoded_ca_cert: Option<Vec<u8>>,
}

impl RepoCerts {
    pub fn new(cert: Option<String>, ca_cert: Option<String>) -> Self {
        Self {
            cert: cert.filter(|c| !c.is_empty()),
            ca_cert: ca_cert.filter(|c| !c.is_empty()),
            ..Default::default()
        }
    }

    pub fn decode(&mut self) -> HoistResult<()> {
        self.decoded_cert = decode_pem(self.cert.as_deref(), "certificate")?;
        self.decoded_ca_cert = decode_pem(self.ca_cert.as_deref(), "CA certificate")?;
        Ok(())
    }

    /// Write the decoded certificates to files that outlive the step (helm keeps their
    /// paths in its repository config) and return the matching `repo add` flags.
    pub fn write(&self) -> HoistResult<Vec<String>> {
        let mut flags = Vec::new();
        if let Some(bytes) = &self.decoded_cert {
            flags.push("--cert-file".to_string());
            flags.push(write_temp(bytes, ".cert")?);
        }
        if let Some(bytes) = &self.decoded_ca_cert {
            flags.push("--ca-file".to_string());
            flags.push(write_temp(bytes, ".ca.cert")?);
        }
        Ok(flags)
    }
}

fn decode_pem(raw: Option<&str>, what: &str) -> HoistResult<Option<Vec<u8>>> {
    raw.map(|s| STANDARD.decode(s.trim()))
        .transpose()
        .map_err(|e| HoistError::validation(format!("failed to base64-decode {} string: {}", what, e)))
}

fn write_temp(bytes: &[u8], suffix: &str) -> HoistResult<String> {
    let mut file = tempfile::Builder::new().prefix("repo").suffix(suffix).tempfile()?;
    file.write_all(bytes)?;
    let (_, path) = file.keep().map_err(|e| HoistError::Io(e.error))?;
    let path = path.display().to_string();
    debug!(path = %path, "wrote repo certificate");
    Ok(path)
}

pub struct AddRepo {
    ctx: StepContext,
    repo: String,
    certs: RepoCerts,
    spec: Option<RepoSpec>,
}

impl AddRepo {
    pub fn new(ctx: StepContext, repo: impl Into<String>, certs: RepoCerts) -> Self {
        Self { ctx, repo: repo.into(), certs, spec: None }
    }

    /// Command for the prepared repo; None before `prepare`.
    pub fn command(&self, cert_flags: Vec<String>) -> Option<HelmCommand> {
        let spec = self.spec.as_ref()?;
        Some(self.ctx.helm().args(["repo", "add"]).args(cert_flags).arg(spec.name.clone()).arg(spec.url.clone()))
    }
}

#[async_trait::async_trait]
impl Operation for AddRepo {
    fn name(&self) -> &'static str {
        "add-repo"
    }

    fn prepare(&mut self) -> HoistResult<()> {
        let spec: RepoSpec = self.repo.parse()?;
        self.certs.decode()?;
        self.spec = Some(spec);
        Ok(())
    }

    async fn execute(&mut self) -> HoistResult<()> {
        let flags = self.certs.write()?;
        let cmd = self.command(flags).ok_or_else(|| HoistError::validation("add-repo executed before prepare"))?;
        debug!(command = %cmd, "generated command");
        self.ctx.runner.run(&cmd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RunConfig;
    use hoist_apply::ScriptedRunner;
    use std::sync::Arc;

    fn ctx(runner: &Arc<ScriptedRunner>) -> StepContext {
        StepContext::new(RunConfig { namespace: "prod".into(), ..Default::default() }, runner.clone())
    }

    #[test]
    fn repo_spec_validation() {
        let spec: RepoSpec = "stable=https://charts.example.com".parse().unwrap();
        assert_eq!(spec.name, "stable");
        assert_eq!(spec.url, "https://charts.example.com");
        let with_eq: RepoSpec = "q=https://x/?a=b".parse().unwrap();
        assert_eq!(with_eq.url, "https://x/?a=b");

        assert!("".parse::<RepoSpec>().unwrap_err().to_string().contains("repo is required"));
        assert!("stable".parse::<RepoSpec>().unwrap_err().to_string().contains("bad repo spec 'stable'"));
        assert!("=https://x".parse::<RepoSpec>().is_err());
    }

    #[tokio::test]
    async fn adds_repo_with_global_flags() {
        let runner = Arc::new(ScriptedRunner::new());
        let mut step = AddRepo::new(ctx(&runner), "stable=https://charts.example.com", RepoCerts::default());
        step.prepare().unwrap();
        assert!(runner.calls().is_empty());
        step.execute().await.unwrap();
        assert_eq!(runner.calls()[0].to_string(), "helm --namespace prod repo add stable https://charts.example.com");
    }

    #[test]
    fn bad_certificate_fails_prepare() {
        let runner = Arc::new(ScriptedRunner::new());
        let mut step = AddRepo::new(ctx(&runner), "stable=https://x", RepoCerts::new(Some("not base64!".into()), None));
        let err = step.prepare().unwrap_err();
        assert!(err.to_string().contains("base64-decode certificate"), "err={}", err);
    }

    #[tokio::test]
    async fn certificates_are_written_and_flagged() {
        let runner = Arc::new(ScriptedRunner::new());
        let certs = RepoCerts::new(Some(STANDARD.encode("CERT")), Some(STANDARD.encode("CA")));
        let mut step = AddRepo::new(ctx(&runner), "secure=https://x", certs);
        step.prepare().unwrap();
        step.execute().await.unwrap();

        let args = runner.calls()[0].get_args().to_vec();
        let cert = &args[args.iter().position(|a| a == "--cert-file").unwrap() + 1];
        let ca = &args[args.iter().position(|a| a == "--ca-file").unwrap() + 1];
        assert_eq!(std::fs::read_to_string(cert).unwrap(), "CERT");
        assert_eq!(std::fs::read_to_string(ca).unwrap(), "CA");
        assert!(ca.ends_with(".ca.cert"));
        assert_eq!(&args[args.len() - 2..], ["secure", "https://x"]);
        std::fs::remove_file(cert).unwrap();
        std::fs::remove_file(ca).unwrap();
    }

    #[tokio::test]
    async fn failing_helm_propagates() {
        let runner = Arc::new(ScriptedRunner::new().fail_on("repo add"));
        let mut step = AddRepo::new(ctx(&runner), "stable=https://x", RepoCerts::default());
        step.prepare().unwrap();
        let err = step.execute().await.unwrap_err();
        assert!(matches!(err, HoistError::Command { .. }));
    }
}
