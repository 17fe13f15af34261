//! End-to-end provisioning runs against a scratch root with fake backends.

use artbox::host::{CommandOutput, CommandRunner, CommandSpec, Fetcher, PackageManager};
use artbox::pipeline::PipelineBuilder;
use artbox::recipe::toolchain_steps;
use artbox::{
    ArtboxError, ArtboxResult, CancelFlag, EnvironmentState, Host, Image, PipelineExecutor,
    ProvisionConfig, StepFailure,
};
use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const TOOL_URL: &str = "https://mirror.example.com/toolC/v1/toolC.tar.gz";

const CONFIG: &str = r#"{
    "base_image": "registry.example.com/ubi9:9.4",
    "repositories": ["internal.repo"],
    "packages": { "install": ["compilerA", "vcsToolB"] },
    "tools": [
        {
            "name": "toolC",
            "version": "v1",
            "url": "https://mirror.example.com/toolC/{version}/toolC.tar.gz",
            "members": ["toolC"]
        }
    ],
    "application": { "source": "app", "dest": "/opt/app" },
    "kerberos": { "src": "krb5.conf" },
    "identity": { "user": "dev", "uid": 1000 },
    "workdir": "/home/dev"
}"#;

#[derive(Default)]
struct Fetches {
    bodies: BTreeMap<String, Vec<u8>>,
}

#[async_trait]
impl Fetcher for Fetches {
    async fn fetch(&self, url: &str, _trust_anchors: &[PathBuf]) -> ArtboxResult<Vec<u8>> {
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| ArtboxError::Fetch(format!("GET {} returned 404 Not Found", url)))
    }
}

#[derive(Default)]
struct Commands {
    seen: Mutex<Vec<CommandSpec>>,
}

impl Commands {
    fn count(&self, program: &str) -> usize {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|spec| spec.program == program)
            .count()
    }
}

#[async_trait]
impl CommandRunner for Commands {
    async fn run(&self, spec: &CommandSpec) -> ArtboxResult<CommandOutput> {
        self.seen.lock().unwrap().push(spec.clone());
        Ok(CommandOutput::success())
    }
}

#[derive(Default)]
struct Packages {
    installed: Mutex<BTreeSet<String>>,
}

#[async_trait]
impl PackageManager for Packages {
    async fn installed(&self, _root: &Path, names: &[String]) -> ArtboxResult<BTreeSet<String>> {
        let installed = self.installed.lock().unwrap();
        Ok(names.iter().filter(|n| installed.contains(*n)).cloned().collect())
    }

    async fn install(&self, _root: &Path, names: &[String]) -> ArtboxResult<()> {
        self.installed.lock().unwrap().extend(names.iter().cloned());
        Ok(())
    }

    async fn remove(&self, _root: &Path, names: &[String]) -> ArtboxResult<()> {
        let mut installed = self.installed.lock().unwrap();
        for name in names {
            installed.remove(name);
        }
        Ok(())
    }
}

fn tool_archive() -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, data) in [("toolC", &b"#!/bin/sh\necho toolC v1\n"[..]), ("README", &b"docs"[..])] {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, name, data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn build_context() -> TempDir {
    let context = TempDir::new().unwrap();
    let dir = context.path();
    std::fs::write(dir.join("internal.repo"), "[internal]\nbaseurl=https://mirror.example.com/rpms\n").unwrap();
    std::fs::write(dir.join("krb5.conf"), "[libdefaults]\n default_realm = EXAMPLE.COM\n").unwrap();
    std::fs::create_dir_all(dir.join("app/lib")).unwrap();
    std::fs::write(dir.join("app/install.sh"), "#!/bin/sh\npip install .\n").unwrap();
    std::fs::write(dir.join("app/lib/tool.py"), "print('hi')\n").unwrap();
    context
}

struct Run {
    root: TempDir,
    commands: Arc<Commands>,
    result: Result<Image, StepFailure>,
    state: EnvironmentState,
}

async fn provision(fetches: Fetches) -> Run {
    let context = build_context();
    let root = TempDir::new().unwrap();
    let commands = Arc::new(Commands::default());
    let host = Host::new(
        commands.clone(),
        Arc::new(fetches),
        Arc::new(Packages::default()),
    );

    let config = ProvisionConfig::from_json(CONFIG).unwrap();
    let pipeline = PipelineBuilder::from_steps(toolchain_steps(&config))
        .build()
        .unwrap();
    let mut state = EnvironmentState::new(root.path(), context.path())
        .with_base_image(&config.base_image);

    let result = PipelineExecutor::run(&pipeline, &host, &mut state, &CancelFlag::new()).await;
    Run {
        root,
        commands,
        result,
        state,
    }
}

fn serving_tool() -> Fetches {
    let mut fetches = Fetches::default();
    fetches.bodies.insert(TOOL_URL.to_string(), tool_archive());
    fetches
}

#[tokio::test]
async fn toolchain_image_end_to_end() {
    let run = provision(serving_tool()).await;
    let image = run.result.unwrap();

    assert!(image.has_package("compilerA"));
    assert!(image.has_package("vcsToolB"));

    let tool = image.binary_on_path("toolC").expect("toolC on PATH");
    assert_eq!(tool.path, PathBuf::from("/usr/local/bin/toolC"));
    assert!(run.root.path().join("usr/local/bin/toolC").exists());
    assert!(!run.root.path().join("usr/local/bin/README").exists());

    assert_eq!(run.commands.count("./install.sh"), 1);
    let install = run
        .commands
        .seen
        .lock()
        .unwrap()
        .iter()
        .find(|spec| spec.program == "./install.sh")
        .cloned()
        .unwrap();
    assert!(install.args.is_empty());
    assert_eq!(install.cwd, Some(run.root.path().join("opt/app")));

    assert!(run.root.path().join("etc/yum.repos.d/internal.repo").exists());
    assert!(run.root.path().join("etc/krb5.conf").exists());

    let identity = image.identity.as_ref().unwrap();
    assert_eq!(identity.uid, 1000);
    assert!(!run.state.phase().is_privileged());
    assert_eq!(image.workdir, PathBuf::from("/home/dev"));
    assert_eq!(image.env.get("HOME").map(String::as_str), Some("/home/dev"));
    assert!(image.floating.is_empty());
}

#[tokio::test]
async fn manifest_round_trips_through_disk() {
    let run = provision(serving_tool()).await;
    let image = run.result.unwrap();

    let manifest = run.root.path().join("artbox-image.json");
    image.write_manifest(&manifest).unwrap();
    let loaded = Image::load_manifest(&manifest).unwrap();
    assert_eq!(loaded.contents(), image.contents());
    assert_eq!(loaded.run_id, image.run_id);
}

#[tokio::test]
async fn equal_inputs_give_equal_images() {
    let first = provision(serving_tool()).await.result.unwrap();
    let second = provision(serving_tool()).await.result.unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.contents(), second.contents());
}

#[tokio::test]
async fn unreachable_tool_stops_the_run() {
    let run = provision(Fetches::default()).await;
    let failure = run.result.unwrap_err();

    assert_eq!(failure.step, "install-toolC");
    assert!(matches!(failure.source, ArtboxError::Fetch(_)));
    assert_eq!(run.commands.count("./install.sh"), 0);
    assert_eq!(run.commands.count("useradd"), 0);
    assert!(!run.root.path().join("opt/app").exists());
    assert!(run.state.phase().is_privileged());
}

#[test]
fn demo_config_builds_a_valid_pipeline() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../demos/toolchain/artbox.json");
    let config = ProvisionConfig::load(&path).unwrap();
    let pipeline = PipelineBuilder::from_steps(toolchain_steps(&config))
        .build()
        .unwrap();

    let drop = pipeline.identity_drop_index().unwrap();
    assert!(pipeline.steps()[drop + 1..].iter().all(|s| !s.is_floating()));
    assert!(pipeline.steps().iter().any(|s| s.is_floating()));
}
