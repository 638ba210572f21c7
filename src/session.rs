//! The restore-session state machine, the library's top-level facade.
//!
//! A [`RestoreSession`] is a plain struct a caller owns and threads
//! through explicitly, never a process-wide singleton: state lives in
//! the struct, not in globals, so a connection handler can run several
//! sessions side by side without them stepping on each other.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::builder::{CatalogRow, TreeBuilder};
use crate::bsr::synth::{synthesize, VolumeCatalog};
use crate::cancel::CancellationFlag;
use crate::config::Configuration;
use crate::counters;
use crate::error::{Error, Result};
use crate::node::NodeIndex;
use crate::selection::{ListEntry, Selection};
use crate::tree::BuiltTree;

/// A catalog row source: the only thing the core ever asks
/// of the SQL catalog -- push rows at a handler, one at a time.
pub trait RowSource {
    fn for_each_row(&mut self, handler: impl FnMut(&CatalogRow) -> Result<()>) -> Result<()>;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SessionState {
    SelectStart,
    SelectTree,
    SelectRestoreOptions,
    Committed,
    Aborted,
}

impl SessionState {
    fn name(self) -> &'static str {
        match self {
            SessionState::SelectStart => "SelectStart",
            SessionState::SelectTree => "SelectTree",
            SessionState::SelectRestoreOptions => "SelectRestoreOptions",
            SessionState::Committed => "Committed",
            SessionState::Aborted => "Aborted",
        }
    }
}

/// One restore browsing/selection session. Not `Sync`/`Send`
/// by itself; a connection plugin driving many sessions concurrently is
/// expected to give each one its own thread or wrap it in a lock, each
/// owning its `RestoreSession` outright.
pub struct RestoreSession {
    state: SessionState,
    tree: Option<BuiltTree>,
    current: NodeIndex,
    job_ids: Vec<u32>,
    config: Configuration,
    cancel: CancellationFlag,
    bsr_path: Option<PathBuf>,
    /// Whether `bsr_path` was auto-generated (and so safe for `abort_restore_session`
    /// to unlink) rather than a caller-supplied destination.
    bsr_path_is_temp: bool,
    job: Option<String>,
    client: Option<String>,
    last_error: Option<String>,
}

impl RestoreSession {
    pub fn create(config: Configuration) -> Self {
        RestoreSession {
            state: SessionState::SelectStart,
            tree: None,
            current: NodeIndex::ROOT,
            job_ids: Vec::new(),
            config,
            cancel: CancellationFlag::new(),
            bsr_path: None,
            bsr_path_is_temp: false,
            job: None,
            client: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn cancellation_flag(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    fn require(&self, expected: SessionState) -> Result<()> {
        if self.state != expected {
            return Err(Error::WrongState {
                expected: expected.name(),
                found: self.state.name(),
            });
        }
        Ok(())
    }

    fn fail<T>(&mut self, err: Error) -> Result<T> {
        self.last_error = Some(err.to_string());
        Err(err)
    }

    /// `SelectStart -> SelectTree`: build the tree from `rows`. `select_parents` is
    /// accepted for signature compatibility but not implemented -- parent-job
    /// auto-selection is deferred as a future extension; passing `true`
    /// only warns and otherwise behaves as if it were `false`.
    pub fn start_from_jobids<R: RowSource>(
        &mut self,
        job_ids: &[u32],
        select_parents: bool,
        rows: &mut R,
    ) -> Result<()> {
        if let Err(e) = self.require(SessionState::SelectStart) {
            return self.fail(e);
        }
        if select_parents {
            warn!("parent-job auto-selection was requested but is not implemented; using only the supplied job_ids");
        }

        let mut builder = TreeBuilder::new(&self.config);
        let build_result = rows.for_each_row(|row| {
            if self.cancel.is_set() {
                return Err(Error::Cancelled);
            }
            // `start_from_jobids` exposes no mark-on-create
            // flag of its own; ingestion never pre-marks nodes here
            // (distinct from `mark_on_load_default`, which only applies
            // to the serializer's "mark on load" behavior).
            builder.handle_row(row, false).map(|_| ())
        });
        if let Err(e) = build_result {
            return self.fail(e);
        }

        let tree = builder.build();
        self.current = tree.root();
        self.tree = Some(tree);
        self.job_ids = job_ids.to_vec();
        self.state = SessionState::SelectTree;
        Ok(())
    }

    fn tree_mut(&mut self) -> Result<&mut BuiltTree> {
        self.tree.as_mut().ok_or(Error::WrongState {
            expected: "SelectTree",
            found: self.state.name(),
        })
    }

    /// List children of the current directory.
    pub fn list_files(&mut self, glob: Option<&str>) -> Result<Vec<ListEntry>> {
        if let Err(e) = self.require(SessionState::SelectTree) {
            return self.fail(e);
        }
        let current = self.current;
        let case_sensitive = self.config.case_sensitive;
        let tree = match self.tree_mut() {
            Ok(t) => t,
            Err(e) => return self.fail(e),
        };
        let sel = Selection::with_cursor(tree, current, case_sensitive);
        sel.list(glob)
    }

    /// `cd`.
    pub fn change_directory(&mut self, path: &str) -> Result<()> {
        if let Err(e) = self.require(SessionState::SelectTree) {
            return self.fail(e);
        }
        let current = self.current;
        let case_sensitive = self.config.case_sensitive;
        let tree = match self.tree_mut() {
            Ok(t) => t,
            Err(e) => return self.fail(e),
        };
        let mut sel = Selection::with_cursor(tree, current, case_sensitive);
        let result = sel.change_directory(path);
        self.current = sel.current_node();
        if let Err(e) = result {
            return self.fail(e);
        }
        Ok(())
    }

    pub fn current_directory(&self) -> Result<String> {
        self.require(SessionState::SelectTree)?;
        Ok(self.tree.as_ref().unwrap().path_to(self.current))
    }

    /// `mark`/`unmark`. Returns the count of
    /// nodes touched.
    pub fn mark_unmark(&mut self, glob: &str, mark: bool) -> Result<usize> {
        if let Err(e) = self.require(SessionState::SelectTree) {
            return self.fail(e);
        }
        let current = self.current;
        let case_sensitive = self.config.case_sensitive;
        let cancel = self.cancel.clone();
        let tree = match self.tree_mut() {
            Ok(t) => t,
            Err(e) => return self.fail(e),
        };
        let mut sel = Selection::with_cursor(tree, current, case_sensitive);
        let result = if mark {
            sel.mark(glob, &cancel)
        } else {
            sel.unmark(glob, &cancel)
        };
        self.current = sel.current_node();
        match result {
            Ok(n) => Ok(n),
            Err(e) => self.fail(e),
        }
    }

    /// `SelectTree -> SelectRestoreOptions`: synthesize the BSR and write
    /// it to `bootstrap_path`, or a unique auto-generated `.bsr` path if
    /// none is given.
    pub fn finish_selection(
        &mut self,
        bootstrap_path: Option<&Path>,
        catalog: &dyn VolumeCatalog,
    ) -> Result<PathBuf> {
        if let Err(e) = self.require(SessionState::SelectTree) {
            return self.fail(e);
        }
        let tree = self.tree.as_ref().unwrap();
        let report = match synthesize(tree, catalog, &self.cancel) {
            Ok(r) => r,
            Err(e) => return self.fail(e),
        };
        counters::log_counts();

        let is_temp = bootstrap_path.is_none();
        let path = match bootstrap_path {
            Some(p) => p.to_path_buf(),
            None => match tempfile::Builder::new().suffix(".bsr").tempfile() {
                Ok(f) => f.path().to_path_buf(),
                Err(e) => return self.fail(Error::Io(e)),
            },
        };
        if let Err(e) = std::fs::write(&path, report.text.as_bytes()) {
            return self.fail(Error::Io(e));
        }

        self.bsr_path = Some(path.clone());
        self.bsr_path_is_temp = is_temp;
        self.state = SessionState::SelectRestoreOptions;
        Ok(path)
    }

    /// `SelectRestoreOptions -> Committed`.
    pub fn commit_restore_session(&mut self, job: String, client: String, catalog_job_id: u32) -> Result<u32> {
        if let Err(e) = self.require(SessionState::SelectRestoreOptions) {
            return self.fail(e);
        }
        if job.is_empty() || client.is_empty() {
            return self.fail(Error::CatalogError("job and client must be non-empty to commit".into()));
        }
        self.job = Some(job);
        self.client = Some(client);
        self.state = SessionState::Committed;
        Ok(catalog_job_id)
    }

    /// `Any -> Aborted`. Frees the tree and best-effort-unlinks the BSR
    /// file, but only when it was an auto-generated temp path -- a
    /// caller-supplied destination is left alone.
    pub fn abort_restore_session(&mut self) {
        self.tree = None;
        let is_temp = self.bsr_path_is_temp;
        if let Some(path) = self.bsr_path.take() {
            if is_temp {
                if let Err(e) = std::fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(?path, error = %e, "failed to remove temporary BSR file on abort");
                    }
                }
            }
        }
        self.bsr_path_is_temp = false;
        self.state = SessionState::Aborted;
    }

    pub fn error_string(&self) -> String {
        self.last_error.clone().unwrap_or_else(|| "no error".to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bsr::synth::VolumeRecord;
    use crate::lstat::{self, DecodedLstat};

    struct StaticRows(Vec<(String, String, i32, u32, String)>);

    impl RowSource for StaticRows {
        fn for_each_row(&mut self, mut handler: impl FnMut(&CatalogRow) -> Result<()>) -> Result<()> {
            for (path, filename, fi, job, lstat) in &self.0 {
                handler(&CatalogRow {
                    path,
                    filename,
                    file_index: *fi,
                    job_id: *job,
                    lstat,
                    delta_seq: 0,
                    fhinfo: 0,
                    fhnode: 0,
                })?;
            }
            Ok(())
        }
    }

    struct NullCatalog;
    impl VolumeCatalog for NullCatalog {
        fn volumes_for_job(&self, _job_id: u32) -> Result<Vec<VolumeRecord>> {
            Ok(vec![VolumeRecord {
                volume_name: "Vol-0001".into(),
                media_type: "LTO8".into(),
                device: "Drive-0".into(),
                slot: None,
                vol_session_id: 1,
                vol_session_time: 1,
                first_vol_file: 0,
                last_vol_file: 0,
                first_vol_block: 0,
                last_vol_block: 0,
            }])
        }
    }

    fn sample_rows() -> StaticRows {
        let dir = lstat::encode(DecodedLstat { mode: 0o040755, nlink: 2, link_fi: 0 });
        let file = lstat::encode(DecodedLstat { mode: 0o100644, nlink: 1, link_fi: 0 });
        StaticRows(vec![
            ("/".into(), "".into(), 0, 1, dir),
            ("/etc/".into(), "hosts".into(), 3, 1, file.clone()),
            ("/etc/".into(), "motd".into(), 4, 1, file),
        ])
    }

    #[test]
    fn wrong_state_then_success() {
        let mut session = RestoreSession::create(Configuration::default());
        let err = session.list_files(None).unwrap_err();
        assert!(matches!(err, Error::WrongState { .. }));

        let mut rows = sample_rows();
        session.start_from_jobids(&[1], false, &mut rows).unwrap();
        assert_eq!(session.state(), SessionState::SelectTree);
        let listing = session.list_files(None).unwrap();
        assert!(!listing.is_empty());
    }

    #[test]
    fn full_happy_path() {
        let mut session = RestoreSession::create(Configuration::default());
        let mut rows = sample_rows();
        session.start_from_jobids(&[1], false, &mut rows).unwrap();

        session.change_directory("/etc").unwrap();
        assert_eq!(session.current_directory().unwrap(), "/etc");
        let touched = session.mark_unmark("hosts", true).unwrap();
        assert_eq!(touched, 1);

        let dir = tempfile::tempdir().unwrap();
        let bsr_path = dir.path().join("restore.bsr");
        let catalog = NullCatalog;
        let written = session.finish_selection(Some(&bsr_path), &catalog).unwrap();
        assert_eq!(written, bsr_path);
        assert!(bsr_path.exists());
        assert_eq!(session.state(), SessionState::SelectRestoreOptions);

        let job_id = session
            .commit_restore_session("restore-job".into(), "myclient".into(), 99)
            .unwrap();
        assert_eq!(job_id, 99);
        assert_eq!(session.state(), SessionState::Committed);
    }

    #[test]
    fn abort_frees_tree_but_keeps_caller_supplied_bsr() {
        let mut session = RestoreSession::create(Configuration::default());
        let mut rows = sample_rows();
        session.start_from_jobids(&[1], false, &mut rows).unwrap();
        session.mark_unmark("*", true).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let bsr_path = dir.path().join("restore.bsr");
        let catalog = NullCatalog;
        session.finish_selection(Some(&bsr_path), &catalog).unwrap();
        assert!(bsr_path.exists());

        session.abort_restore_session();
        assert_eq!(session.state(), SessionState::Aborted);
        assert!(bsr_path.exists());
    }

    #[test]
    fn abort_unlinks_auto_generated_temp_bsr() {
        let mut session = RestoreSession::create(Configuration::default());
        let mut rows = sample_rows();
        session.start_from_jobids(&[1], false, &mut rows).unwrap();
        session.mark_unmark("*", true).unwrap();

        let catalog = NullCatalog;
        let bsr_path = session.finish_selection(None, &catalog).unwrap();
        assert!(bsr_path.exists());

        session.abort_restore_session();
        assert_eq!(session.state(), SessionState::Aborted);
        assert!(!bsr_path.exists());
    }
}
