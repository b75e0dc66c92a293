//! Kerberos security provider on the system GSS-API library.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::gss::{SecurityContext, SecurityProvider, Step};
use libgssapi::context::{ClientCtx, CtxFlags, SecurityContext as _};
use libgssapi::credential::{Cred, CredUsage};
use libgssapi::name::Name;
use libgssapi::oid::{OidSet, GSS_MECH_KRB5, GSS_NT_KRB5_PRINCIPAL};

/// Environment variable naming the Kerberos ticket cache.
const CCACHE_VAR: &str = "KRB5CCNAME";

/// Uses credentials from the default ticket cache, or those of
/// `login_principal` when set.
///
/// A configured credential cache is selected through `KRB5CCNAME`, which
/// applies to every GSS-API user in the process.
#[derive(Debug, Clone, Default)]
pub struct Krb5Provider {
    login_principal: Option<String>,
    ccache: Option<String>,
}

impl Krb5Provider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            login_principal: config.login_principal.clone(),
            ccache: config.ccache.clone(),
        }
    }

    pub fn with_login_principal(mut self, principal: impl Into<String>) -> Self {
        self.login_principal = Some(principal.into());
        self
    }

    /// Take tickets from `ccache`, e.g. `FILE:/tmp/krb5cc_service`.
    pub fn with_ccache(mut self, ccache: impl Into<String>) -> Self {
        self.ccache = Some(ccache.into());
        self
    }

    pub fn ccache(&self) -> Option<&str> {
        self.ccache.as_deref()
    }

    fn credentials(&self) -> Result<Cred> {
        if let Some(ccache) = &self.ccache {
            log::debug!("Using credential cache {}", ccache);
            std::env::set_var(CCACHE_VAR, ccache);
        }

        let mut mechs = OidSet::new().map_err(|e| gss("mechanism set", e))?;
        mechs.add(&GSS_MECH_KRB5).map_err(|e| gss("mechanism set", e))?;

        let name = match &self.login_principal {
            Some(principal) => Some(principal_name(principal)?),
            None => None,
        };
        Cred::acquire(name.as_ref(), None, CredUsage::Initiate, Some(&mechs))
            .map_err(|e| gss("acquiring credentials", e))
    }
}

fn gss(what: &str, e: libgssapi::error::Error) -> Error {
    Error::auth(format!("{}: {}", what, e))
}

fn principal_name(principal: &str) -> Result<Name> {
    Name::new(principal.as_bytes(), Some(&GSS_NT_KRB5_PRINCIPAL))
        .map_err(|e| gss(&format!("parsing principal {}", principal), e))
}

impl SecurityProvider for Krb5Provider {
    fn init_context(&self, target: &str) -> Result<(Box<dyn SecurityContext>, Step)> {
        let cred = self.credentials()?;
        let flags = CtxFlags::GSS_C_MUTUAL_FLAG | CtxFlags::GSS_C_CONF_FLAG | CtxFlags::GSS_C_INTEG_FLAG;
        let ctx = ClientCtx::new(Some(cred), principal_name(target)?, flags, Some(&GSS_MECH_KRB5));

        let mut context = Krb5Context {
            ctx,
            mutual: false,
            local: None,
            peer: None,
        };
        let step = context.advance(None)?;
        Ok((Box::new(context), step))
    }
}

struct Krb5Context {
    ctx: ClientCtx,
    mutual: bool,
    local: Option<String>,
    peer: Option<String>,
}

impl Krb5Context {
    fn advance(&mut self, token: Option<&[u8]>) -> Result<Step> {
        let out = self
            .ctx
            .step(token, None)
            .map_err(|e| gss("establishing context", e))?;
        let established = self.ctx.is_complete();
        if established {
            self.inspect();
        }
        Ok(Step {
            token: out.map(|buf| buf.to_vec()),
            established,
        })
    }

    fn inspect(&mut self) {
        match self.ctx.flags() {
            Ok(flags) => self.mutual = flags.contains(CtxFlags::GSS_C_MUTUAL_FLAG),
            Err(e) => log::warn!("Cannot read context flags: {}", e),
        }
        self.local = self.ctx.source_name().ok().map(|n| n.to_string());
        self.peer = self.ctx.target_name().ok().map(|n| n.to_string());
    }
}

impl SecurityContext for Krb5Context {
    fn step(&mut self, token: &[u8]) -> Result<Step> {
        self.advance(Some(token))
    }

    fn wrap(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let buf = self.ctx.wrap(true, plaintext).map_err(|e| gss("wrap", e))?;
        Ok(buf.to_vec())
    }

    fn unwrap(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let buf = self.ctx.unwrap(ciphertext).map_err(|e| gss("unwrap", e))?;
        Ok(buf.to_vec())
    }

    fn mutual_auth(&self) -> bool {
        self.mutual
    }

    fn local_name(&self) -> Option<String> {
        self.local.clone()
    }

    fn peer_name(&self) -> Option<String> {
        self.peer.clone()
    }
}
