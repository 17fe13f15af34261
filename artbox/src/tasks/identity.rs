//! Task: Create the runtime identity.
//!
//! Adds the unprivileged user and its home directory. On success the
//! pipeline leaves the privileged phase for good.

use crate::host::{CommandSpec, Host};
use crate::state::{EnvironmentState, Identity, StepOutput};
use crate::step::IdentitySpec;
use crate::util::create_dir_owned;
use artbox_shared::{ArtboxError, ArtboxResult};
use std::path::Path;

const PASSWD: &str = "/etc/passwd";
const GROUP: &str = "/etc/group";

/// One `name:x:id:...` record from passwd or group.
#[derive(Debug, PartialEq, Eq)]
struct Account {
    name: String,
    id: u32,
    /// Primary gid; passwd records only.
    gid: Option<u32>,
}

pub(super) async fn run_create_identity(
    host: &Host,
    spec: &IdentitySpec,
    state: &EnvironmentState,
) -> ArtboxResult<StepOutput> {
    if spec.uid == 0 || spec.gid == 0 {
        return Err(ArtboxError::Identity(
            "runtime identity must not be uid or gid 0".into(),
        ));
    }

    let accounts = read_accounts(&state.resolve(Path::new(PASSWD))?)?;
    let by_uid = accounts.iter().find(|a| a.id == spec.uid);
    let by_name = accounts.iter().find(|a| a.name == spec.user);

    let gid = match (by_uid, by_name) {
        (Some(owner), _) if owner.name != spec.user => {
            return Err(ArtboxError::Identity(format!(
                "uid {} is already used by {}",
                spec.uid, owner.name
            )));
        }
        (_, Some(existing)) if existing.id != spec.uid => {
            return Err(ArtboxError::Identity(format!(
                "user {} already exists with uid {}",
                spec.user, existing.id
            )));
        }
        (Some(existing), _) => {
            tracing::info!(user = %spec.user, uid = spec.uid, "Runtime identity already present");
            existing.gid.unwrap_or(spec.gid)
        }
        (None, _) => {
            add_group(host, spec, state).await?;
            add_user(host, spec, state).await?;
            spec.gid
        }
    };

    let home = state.resolve(&spec.home)?;
    create_dir_owned(&home, Some((spec.uid, gid))).map_err(|e| {
        ArtboxError::Identity(format!(
            "home directory {} could not be created: {}",
            spec.home.display(),
            e
        ))
    })?;

    Ok(StepOutput {
        identity: Some(Identity {
            user: spec.user.clone(),
            uid: spec.uid,
            gid,
            home: spec.home.clone(),
        }),
        ..StepOutput::default()
    })
}

/// Create the primary group unless the root already has one with this gid.
async fn add_group(host: &Host, spec: &IdentitySpec, state: &EnvironmentState) -> ArtboxResult<()> {
    let groups = read_accounts(&state.resolve(Path::new(GROUP))?)?;
    if groups.iter().any(|g| g.id == spec.gid) {
        return Ok(());
    }
    if let Some(clash) = groups.iter().find(|g| g.name == spec.user) {
        return Err(ArtboxError::Identity(format!(
            "group {} already exists with gid {}",
            clash.name, clash.id
        )));
    }

    let groupadd = with_root(
        CommandSpec::new("groupadd")
            .arg("--gid")
            .arg(spec.gid.to_string()),
        state,
    )
    .arg(&spec.user);
    run_account_tool(host, &groupadd, &spec.user).await
}

async fn add_user(host: &Host, spec: &IdentitySpec, state: &EnvironmentState) -> ArtboxResult<()> {
    let useradd = with_root(
        CommandSpec::new("useradd")
            .arg("--create-home")
            .arg("--home-dir")
            .arg(spec.home.display().to_string())
            .arg("--uid")
            .arg(spec.uid.to_string())
            .arg("--gid")
            .arg(spec.gid.to_string()),
        state,
    )
    .arg(&spec.user);

    tracing::info!(user = %spec.user, uid = spec.uid, gid = spec.gid, "Creating runtime identity");
    run_account_tool(host, &useradd, &spec.user).await
}

/// The shadow tools edit a staged root through `--root`.
fn with_root(spec: CommandSpec, state: &EnvironmentState) -> CommandSpec {
    match state.confinement() {
        Some(root) => spec.arg("--root").arg(root.display().to_string()),
        None => spec,
    }
}

async fn run_account_tool(host: &Host, spec: &CommandSpec, user: &str) -> ArtboxResult<()> {
    let output = host
        .commands
        .run(spec)
        .await
        .map_err(|e| ArtboxError::Identity(e.to_string()))?;
    if !output.is_success() {
        return Err(ArtboxError::Identity(format!(
            "{} {} failed ({}): {}",
            spec.program,
            user,
            output
                .code
                .map(|c| format!("status {}", c))
                .unwrap_or_else(|| "signal".to_string()),
            output.stderr.trim()
        )));
    }
    Ok(())
}

/// Records of a passwd or group file; a missing file has none.
fn read_accounts(path: &Path) -> ArtboxResult<Vec<Account>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(ArtboxError::Identity(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )));
        }
    };

    Ok(content
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(|line| {
            let mut fields = line.split(':');
            let name = fields.next()?;
            let id = fields.nth(1)?.parse().ok()?;
            let gid = fields.next().and_then(|f| f.parse().ok());
            Some(Account {
                name: name.to_string(),
                id,
                gid,
            })
        })
        .collect())
}
