//! Launches the playbook engine and wires its JSON-lines pipe into an
//! event channel.
//!
//! The runner holds its own write end of the named pipe so neither side
//! blocks while opening it. A FIFO only reaches EOF once every writer
//! has closed, so `wait` drops that end after the engine exits; that is
//! what lets the event channel close.

use anyhow::{anyhow, bail, Context, Result};
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::Receiver;

use super::catalog::ClusterCatalog;
use super::event::Event;
use super::inventory::Inventory;
use super::stream::event_stream;

pub struct PlaybookRunner {
    /// Engine installation root, holding bin/, playbooks/, and the
    /// python libraries.
    ansible_dir: PathBuf,
    /// Per-run artifact directory for the inventory, catalog, and log.
    run_dir: PathBuf,
    /// Raw engine output, normally the run's ansible.log.
    log: File,
    child: Option<Child>,
    named_pipe: Option<PathBuf>,
    pipe_writer: Option<File>,
}

impl PlaybookRunner {
    pub fn new(ansible_dir: impl Into<PathBuf>, run_dir: impl Into<PathBuf>, log: File) -> Self {
        Self {
            ansible_dir: ansible_dir.into(),
            run_dir: run_dir.into(),
            log,
            child: None,
            named_pipe: None,
            pipe_writer: None,
        }
    }

    /// Start the playbook against the full inventory.
    pub fn start(
        &mut self,
        playbook: &str,
        inventory: &Inventory,
        catalog: &ClusterCatalog,
    ) -> Result<Receiver<Event>> {
        self.start_playbook(playbook, inventory, catalog, None)
    }

    /// Start the playbook limited to a single node.
    pub fn start_on_node(
        &mut self,
        playbook: &str,
        inventory: &Inventory,
        catalog: &ClusterCatalog,
        node: &str,
    ) -> Result<Receiver<Event>> {
        self.start_playbook(playbook, inventory, catalog, Some(node))
    }

    /// Block until the engine process exits. The named pipe is removed
    /// regardless of the outcome.
    pub fn wait(&mut self) -> Result<()> {
        let mut child = self
            .child
            .take()
            .ok_or_else(|| anyhow!("wait called, but playbook not started"))?;
        let exec_result = child.wait().context("error waiting for the playbook process");

        // The engine's write end is closed now; dropping ours is what
        // lets the stream reader reach EOF and close the event channel.
        drop(self.pipe_writer.take());

        let remove_result = match self.named_pipe.take() {
            Some(pipe) => std::fs::remove_file(&pipe)
                .with_context(|| format!("failed to clean up named pipe at {}", pipe.display())),
            None => Ok(()),
        };

        match (exec_result, remove_result) {
            (Ok(status), Ok(())) if status.success() => Ok(()),
            (Ok(status), Ok(())) => bail!("error running playbook: process exited with {status}"),
            (Ok(status), Err(remove_err)) if status.success() => Err(remove_err),
            (Ok(status), Err(remove_err)) => Err(remove_err
                .context(format!("error running playbook: process exited with {status}"))),
            (Err(exec_err), Ok(())) => Err(exec_err),
            (Err(exec_err), Err(remove_err)) => Err(remove_err.context(exec_err)),
        }
    }

    fn start_playbook(
        &mut self,
        playbook: &str,
        inventory: &Inventory,
        catalog: &ClusterCatalog,
        limit: Option<&str>,
    ) -> Result<Receiver<Event>> {
        let playbook_path = self.ansible_dir.join("playbooks").join(playbook);
        if !playbook_path.exists() {
            bail!("playbook {} does not exist", playbook_path.display());
        }

        let inventory_file = self.run_dir.join("inventory.ini");
        std::fs::write(&inventory_file, inventory.to_ini()).with_context(|| {
            format!("error writing inventory file to {}", inventory_file.display())
        })?;

        let catalog_file = self.run_dir.join("clustercatalog.yaml");
        std::fs::write(&catalog_file, catalog.to_yaml()?).with_context(|| {
            format!("error writing catalog file to {}", catalog_file.display())
        })?;

        let pipe = std::env::temp_dir().join(named_pipe_name());
        make_named_pipe(&pipe)?;
        self.named_pipe = Some(pipe.clone());

        // Open read-write first so no open on this FIFO ever blocks:
        // this end counts as a writer for the read-only open below and
        // as a reader for the engine's write-only open.
        let write_end = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&pipe)
            .context("error opening event stream pipe")?;
        let read_end = File::open(&pipe).context("error opening event stream pipe")?;
        self.pipe_writer = Some(write_end);

        let mut cmd = Command::new(self.ansible_dir.join("bin").join("ansible-playbook"));
        cmd.arg("-i")
            .arg(&inventory_file)
            .arg(&playbook_path)
            .arg("--extra-vars")
            .arg(format!("@{}", catalog_file.display()));
        if let Some(node) = limit {
            cmd.arg("--limit").arg(node);
        }
        // Engine output is maximally verbose; it lands in the log file,
        // not on the operator's terminal.
        cmd.arg("-vvvv");

        cmd.env("PYTHONPATH", self.python_path())
            .env("ANSIBLE_HOST_KEY_CHECKING", "False")
            .env(
                "ANSIBLE_CALLBACK_PLUGINS",
                self.ansible_dir.join("playbooks").join("callback"),
            )
            .env("ANSIBLE_CALLBACK_WHITELIST", "json_lines")
            .env(
                "ANSIBLE_CONFIG",
                self.ansible_dir.join("playbooks").join("ansible.cfg"),
            )
            .env("ANSIBLE_TIMEOUT", "60")
            .env("ANSIBLE_JSON_LINES_PIPE", &pipe);

        cmd.stdout(Stdio::from(self.log.try_clone().context("error sharing log file")?));
        cmd.stderr(Stdio::from(self.log.try_clone().context("error sharing log file")?));

        writeln!(self.log, "{}", render_command(&cmd)).context("error writing to log")?;

        let child = cmd.spawn().context("error running playbook")?;
        self.child = Some(child);

        Ok(event_stream(read_end))
    }

    fn python_path(&self) -> String {
        let lib = self.ansible_dir.join("lib/python2.7/site-packages");
        let lib64 = self.ansible_dir.join("lib64/python2.7/site-packages");
        format!("{}:{}", lib.display(), lib64.display())
    }
}

fn named_pipe_name() -> String {
    format!(
        "pipe-{}-{}",
        std::process::id(),
        chrono::Utc::now().format("%Y-%m-%d-%H-%M-%S%.6f")
    )
}

fn make_named_pipe(path: &Path) -> Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .with_context(|| format!("invalid pipe path {}", path.display()))?;
    // SAFETY: c_path is a valid NUL-terminated path.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o644) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("error creating named pipe {}", path.display()));
    }
    Ok(())
}

fn render_command(cmd: &Command) -> String {
    let mut rendered = cmd.get_program().to_string_lossy().into_owned();
    for arg in cmd.get_args() {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::{FileTypeExt, PermissionsExt};
    use std::sync::mpsc::RecvTimeoutError;
    use std::time::Duration;

    fn runner_in(dir: &Path) -> PlaybookRunner {
        let log = File::create(dir.join("ansible.log")).unwrap();
        PlaybookRunner::new(dir.join("ansible"), dir, log)
    }

    #[test]
    fn wait_before_start_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = runner_in(dir.path());
        let err = runner.wait().unwrap_err();
        assert!(err.to_string().contains("playbook not started"));
    }

    #[test]
    fn missing_playbook_is_rejected_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = runner_in(dir.path());
        let err = runner
            .start("kubernetes.yaml", &Inventory::default(), &ClusterCatalog::default())
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn event_channel_closes_after_the_engine_exits() {
        let dir = tempfile::tempdir().unwrap();
        let ansible = dir.path().join("ansible");
        std::fs::create_dir_all(ansible.join("bin")).unwrap();
        std::fs::create_dir_all(ansible.join("playbooks")).unwrap();
        std::fs::write(ansible.join("playbooks").join("noop.yaml"), "---\n").unwrap();

        // A stand-in engine: emit one event on the pipe and exit.
        let engine = ansible.join("bin").join("ansible-playbook");
        std::fs::write(
            &engine,
            concat!(
                "#!/bin/sh\n",
                "printf '{\"eventType\":\"PLAYBOOK_START\",\"eventData\":{\"name\":\"noop.yaml\"}}\\n'",
                " > \"$ANSIBLE_JSON_LINES_PIPE\"\n",
            ),
        )
        .unwrap();
        let mut perms = std::fs::metadata(&engine).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&engine, perms).unwrap();

        let log = File::create(dir.path().join("ansible.log")).unwrap();
        let mut runner = PlaybookRunner::new(&ansible, dir.path(), log);
        let events = runner
            .start("noop.yaml", &Inventory::default(), &ClusterCatalog::default())
            .unwrap();
        assert!(runner.named_pipe.as_ref().unwrap().starts_with(std::env::temp_dir()));
        runner.wait().unwrap();

        let first = events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(first, Event::PlaybookStart(_)));
        assert!(matches!(
            events.recv_timeout(Duration::from_secs(5)),
            Err(RecvTimeoutError::Disconnected)
        ));
    }

    #[test]
    fn named_pipes_are_fifos_with_unique_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(named_pipe_name());
        make_named_pipe(&path).unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        assert!(meta.file_type().is_fifo());
    }
}
