/// Restore scenarios against an in-memory repository
/// Covers post-order metadata, missing-parent recovery, error propagation,
/// selection, hard links and the worker bound.
use chrono::{DateTime, TimeZone, Utc};
use snaprestore_core::{
    BlobSource, CancellationToken, CollectWarnings, ContentId, FsMaterializer, HardlinkIndex,
    MaterializeError, MemoryRepository, Node, NodeMaterializer, PathFilter, RepoError,
    RestoreConfig, RestoreError, Restorer, Snapshot, Tree, TreeSource,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

fn time(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 6, day, 12, 0, 0).unwrap()
}

fn file(repo: &MemoryRepository, name: &str, data: &[u8], day: u32) -> Node {
    let blob = repo.add_blob(data);
    Node::file(name, 0o644, time(day), data.len() as u64, vec![blob])
}

fn dir(repo: &MemoryRepository, name: &str, day: u32, nodes: Vec<Node>) -> Node {
    let subtree = repo.add_tree(&Tree::from_nodes(nodes)).unwrap();
    Node::dir(name, 0o755, time(day), subtree)
}

fn snapshot(repo: &MemoryRepository, nodes: Vec<Node>) -> Snapshot {
    let root = repo.add_tree(&Tree::from_nodes(nodes)).unwrap();
    Snapshot::new(root, time(1))
}

fn mtime(path: &Path) -> SystemTime {
    fs::metadata(path).unwrap().modified().unwrap()
}

/// root: a.txt, sub/ { b.txt }
fn scenario_a(repo: &MemoryRepository) -> Snapshot {
    let b = file(repo, "b.txt", b"bee", 3);
    let sub = dir(repo, "sub", 4, vec![b]);
    let a = file(repo, "a.txt", b"alpha", 2);
    snapshot(repo, vec![a, sub])
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Created(PathBuf),
    Metadata(PathBuf),
}

/// Filesystem materializer that records events and concurrent creates
#[derive(Default)]
struct RecordingMaterializer {
    inner: FsMaterializer,
    events: Mutex<Vec<Event>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    delay: Duration,
}

impl RecordingMaterializer {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl NodeMaterializer for RecordingMaterializer {
    fn create_at(
        &self,
        dest: &Path,
        node: &Node,
        blobs: &dyn BlobSource,
        hardlinks: &HardlinkIndex,
    ) -> Result<(), MaterializeError> {
        // directory entries are created on the scheduler thread
        let counted = !node.is_dir();
        if counted {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            thread::sleep(self.delay);
        }
        let result = self.inner.create_at(dest, node, blobs, hardlinks);
        if result.is_ok() {
            self.events
                .lock()
                .unwrap()
                .push(Event::Created(dest.to_path_buf()));
        }
        if counted {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
        result
    }

    fn restore_metadata(&self, dest: &Path, node: &Node) -> Result<(), MaterializeError> {
        self.inner.restore_metadata(dest, node)?;
        self.events
            .lock()
            .unwrap()
            .push(Event::Metadata(dest.to_path_buf()));
        Ok(())
    }
}

/// Every metadata event comes after every event strictly below it
fn assert_post_order(events: &[Event]) {
    for (i, event) in events.iter().enumerate() {
        let Event::Metadata(dir) = event else { continue };
        for later in &events[i + 1..] {
            let path = match later {
                Event::Created(p) | Event::Metadata(p) => p,
            };
            assert!(
                !(path.starts_with(dir) && path != dir),
                "{} touched after metadata of {}",
                path.display(),
                dir.display()
            );
        }
    }
}

#[test]
fn test_scenario_a_post_order() {
    let repo = Arc::new(MemoryRepository::new());
    let snap = scenario_a(&repo);
    let dst = TempDir::new().unwrap();
    let recorder = Arc::new(RecordingMaterializer::default());

    let restorer = Restorer::new(repo.clone(), snap, RestoreConfig::with_workers(2))
        .with_materializer(recorder.clone());
    let summary = restorer
        .restore_to(&CancellationToken::new(), dst.path())
        .unwrap();

    assert_eq!(fs::read(dst.path().join("a.txt")).unwrap(), b"alpha");
    assert_eq!(fs::read(dst.path().join("sub/b.txt")).unwrap(), b"bee");
    assert_eq!(mtime(&dst.path().join("sub")), SystemTime::from(time(4)));
    assert_eq!(mtime(&dst.path().join("sub/b.txt")), SystemTime::from(time(3)));

    let events = recorder.events();
    assert_post_order(&events);
    let sub = dst.path().join("sub");
    let b_created = events
        .iter()
        .position(|e| *e == Event::Created(sub.join("b.txt")))
        .unwrap();
    let sub_metadata = events
        .iter()
        .position(|e| *e == Event::Metadata(sub.clone()))
        .unwrap();
    assert!(b_created < sub_metadata);
    assert_eq!(
        events.iter().filter(|e| matches!(e, Event::Metadata(_))).count(),
        1
    );

    assert_eq!(summary.stats.nodes_restored, 2);
    assert_eq!(summary.stats.dirs_restored, 1);
    assert_eq!(summary.stats.bytes_restored, 8);
    assert_eq!(summary.stats.dirs_discovered, 2);
}

#[test]
fn test_deep_tree_post_order() {
    let repo = Arc::new(MemoryRepository::new());
    let mut level = vec![file(&repo, "leaf.txt", b"leaf", 2)];
    for depth in (0..6).rev() {
        let mut nodes = vec![dir(&repo, &format!("d{}", depth), 10 + depth, level)];
        for i in 0..3 {
            nodes.push(file(&repo, &format!("f{}-{}", depth, i), b"data", 5));
        }
        level = nodes;
    }
    let snap = snapshot(&repo, level);
    let dst = TempDir::new().unwrap();
    let recorder = Arc::new(RecordingMaterializer::default());

    Restorer::new(repo.clone(), snap, RestoreConfig::with_workers(4))
        .with_materializer(recorder.clone())
        .restore_to(&CancellationToken::new(), dst.path())
        .unwrap();

    let events = recorder.events();
    assert_post_order(&events);
    let metadata = events
        .iter()
        .filter(|e| matches!(e, Event::Metadata(_)))
        .count();
    assert_eq!(metadata, 6);

    let mut path = dst.path().to_path_buf();
    for depth in 0..6 {
        path.push(format!("d{}", depth));
        assert_eq!(mtime(&path), SystemTime::from(time(10 + depth)));
    }
}

#[test]
fn test_scenario_b_missing_parent_recovered() {
    let repo = Arc::new(MemoryRepository::new());
    let snap = scenario_a(&repo);
    let dst = TempDir::new().unwrap();

    // only the nested file is selected, so nothing creates `sub` up front
    let filter = PathFilter::new().include("/sub/b.txt").unwrap();
    let summary = Restorer::new(repo.clone(), snap, RestoreConfig::with_workers(2))
        .with_select_policy(filter)
        .restore_to(&CancellationToken::new(), dst.path())
        .unwrap();

    assert_eq!(fs::read(dst.path().join("sub/b.txt")).unwrap(), b"bee");
    assert!(!dst.path().join("a.txt").exists());
    assert_eq!(summary.stats.nodes_restored, 1);
    assert_eq!(summary.stats.errors_handled, 0);
    // `sub` was not selected, so no metadata was applied to it
    assert_eq!(summary.stats.dirs_restored, 0);
}

/// Repository wrapper counting tree loads
struct CountingRepository {
    inner: Arc<MemoryRepository>,
    tree_loads: AtomicUsize,
}

impl TreeSource for CountingRepository {
    fn load_tree(&self, id: &ContentId) -> Result<Tree, RepoError> {
        self.tree_loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load_tree(id)
    }
}

impl BlobSource for CountingRepository {
    fn load_blob(&self, id: &ContentId) -> Result<Vec<u8>, RepoError> {
        self.inner.load_blob(id)
    }
}

/// Fails `broken.txt` at once, every other file only after a delay
struct SlowFilesMaterializer {
    inner: RecordingMaterializer,
}

impl NodeMaterializer for SlowFilesMaterializer {
    fn create_at(
        &self,
        dest: &Path,
        node: &Node,
        blobs: &dyn BlobSource,
        hardlinks: &HardlinkIndex,
    ) -> Result<(), MaterializeError> {
        if !node.is_dir() && node.name != "broken.txt" {
            thread::sleep(Duration::from_millis(100));
        }
        self.inner.create_at(dest, node, blobs, hardlinks)
    }

    fn restore_metadata(&self, dest: &Path, node: &Node) -> Result<(), MaterializeError> {
        self.inner.restore_metadata(dest, node)
    }
}

#[test]
fn test_scenario_c_fatal_handler_error() {
    let repo = Arc::new(MemoryRepository::new());
    let short = repo.add_blob(b"abc");
    let broken = Node::file("broken.txt", 0o644, time(2), 100, vec![short]);
    let mut nodes = vec![broken];
    for i in 0..8 {
        let files = (0..4)
            .map(|j| file(&repo, &format!("f{}.txt", j), b"content", 2))
            .collect();
        nodes.push(dir(&repo, &format!("dir{}", i), 3, files));
    }
    let snap = snapshot(&repo, nodes);
    let dst = TempDir::new().unwrap();

    let counting = Arc::new(CountingRepository {
        inner: repo.clone(),
        tree_loads: AtomicUsize::new(0),
    });
    let materializer = Arc::new(SlowFilesMaterializer {
        inner: RecordingMaterializer::default(),
    });
    let calls = Arc::new(AtomicUsize::new(0));
    let handler_calls = calls.clone();
    let handler = move |_path: &Path, _node: Option<&Node>, err: RestoreError| -> Result<(), RestoreError> {
        handler_calls.fetch_add(1, Ordering::SeqCst);
        Err(err)
    };

    let result = Restorer::new(counting.clone(), snap, RestoreConfig::with_workers(2))
        .with_materializer(materializer.clone())
        .with_error_handler(Arc::new(handler))
        .restore_to(&CancellationToken::new(), dst.path());

    match result {
        Err(RestoreError::Materialize { path, source }) => {
            assert!(path.ends_with("broken.txt"));
            assert!(matches!(source, MaterializeError::SizeMismatch { expected: 100, written: 3, .. }));
        }
        other => panic!("expected materialize error, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // the root and the one directory expanded before the failure came back
    assert_eq!(counting.tree_loads.load(Ordering::SeqCst), 2);

    // the file already handed to the second worker still finished
    let dir7 = dst.path().join("dir7");
    let finished = materializer
        .inner
        .events()
        .into_iter()
        .filter(|e| matches!(e, Event::Created(p) if p.starts_with(&dir7) && p != &dir7))
        .count();
    assert!(finished >= 1);
    // the other directories were discovered but never expanded
    for i in 0..7 {
        let entries = fs::read_dir(dst.path().join(format!("dir{}", i))).unwrap();
        assert_eq!(entries.count(), 0);
    }
}

#[test]
fn test_handled_errors_are_counted() {
    let repo = Arc::new(MemoryRepository::new());
    let short = repo.add_blob(b"abc");
    let snap = snapshot(
        &repo,
        vec![
            Node::file("broken.txt", 0o644, time(2), 100, vec![short]),
            file(&repo, "ok.txt", b"fine", 2),
        ],
    );
    let dst = TempDir::new().unwrap();
    let warnings = Arc::new(CollectWarnings::new());

    let summary = Restorer::new(repo.clone(), snap, RestoreConfig::with_workers(2))
        .with_error_handler(warnings.clone())
        .restore_to(&CancellationToken::new(), dst.path())
        .unwrap();

    assert_eq!(summary.stats.errors_handled, 1);
    assert_eq!(summary.stats.nodes_restored, 1);
    let recorded = warnings.warnings();
    assert_eq!(recorded.len(), 1);
    assert!(recorded[0].path.ends_with("broken.txt"));
    assert_eq!(fs::read(dst.path().join("ok.txt")).unwrap(), b"fine");
}

#[test]
fn test_scenario_d_excluded_subtree_never_loaded() {
    let repo = Arc::new(MemoryRepository::new());
    // the subtree is not stored; loading it would be a fatal TreeLoad error
    let missing = ContentId::of(b"never stored");
    let snap = snapshot(
        &repo,
        vec![
            file(&repo, "keep.txt", b"keep", 2),
            Node::dir("skip", 0o755, time(3), missing),
        ],
    );
    let dst = TempDir::new().unwrap();

    let summary = Restorer::new(repo.clone(), snap, RestoreConfig::with_workers(2))
        .with_select_policy(PathFilter::new().exclude("/skip").unwrap())
        .restore_to(&CancellationToken::new(), dst.path())
        .unwrap();

    assert!(dst.path().join("keep.txt").exists());
    assert!(!dst.path().join("skip").exists());
    assert_eq!(summary.stats.dirs_discovered, 1);
}

#[test]
fn test_missing_tree_is_fatal() {
    let repo = Arc::new(MemoryRepository::new());
    let missing = ContentId::of(b"never stored");
    let snap = snapshot(&repo, vec![Node::dir("gone", 0o755, time(3), missing)]);
    let dst = TempDir::new().unwrap();

    let warnings = Arc::new(CollectWarnings::new());
    let result = Restorer::new(repo.clone(), snap, RestoreConfig::with_workers(2))
        .with_error_handler(warnings.clone())
        .restore_to(&CancellationToken::new(), dst.path());

    assert!(matches!(result, Err(RestoreError::TreeLoad { .. })));
    assert_eq!(warnings.count(), 0);
}

#[cfg(unix)]
#[test]
fn test_scenario_e_hardlinks_across_workers() {
    use std::os::unix::fs::MetadataExt;

    let repo = Arc::new(MemoryRepository::new());
    let blob = repo.add_blob(b"shared content");
    let linked = |name: &str| {
        Node::file(name, 0o644, time(2), 14, vec![blob]).with_link_identity(7, 4242, 2)
    };
    let one = dir(&repo, "one", 3, vec![linked("first")]);
    let two = dir(&repo, "two", 3, vec![linked("second")]);
    let snap = snapshot(&repo, vec![one, two]);
    let dst = TempDir::new().unwrap();

    Restorer::new(repo.clone(), snap, RestoreConfig::with_workers(4))
        .restore_to(&CancellationToken::new(), dst.path())
        .unwrap();

    let first = fs::metadata(dst.path().join("one/first")).unwrap();
    let second = fs::metadata(dst.path().join("two/second")).unwrap();
    assert_eq!(first.ino(), second.ino());
    assert_eq!(first.nlink(), 2);
    assert_eq!(
        fs::read(dst.path().join("two/second")).unwrap(),
        b"shared content"
    );
}

#[test]
fn test_worker_bound_respected() {
    for workers in [1, 3] {
        let repo = Arc::new(MemoryRepository::new());
        let mut nodes: Vec<Node> = (0..12)
            .map(|i| file(&repo, &format!("f{}", i), b"x", 2))
            .collect();
        let nested = (0..6)
            .map(|i| file(&repo, &format!("g{}", i), b"y", 2))
            .collect();
        nodes.push(dir(&repo, "nested", 3, nested));
        let snap = snapshot(&repo, nodes);
        let dst = TempDir::new().unwrap();
        let recorder = Arc::new(RecordingMaterializer::with_delay(Duration::from_millis(5)));

        let summary = Restorer::new(repo.clone(), snap, RestoreConfig::with_workers(workers))
            .with_materializer(recorder.clone())
            .restore_to(&CancellationToken::new(), dst.path())
            .unwrap();

        let max = recorder.max_active.load(Ordering::SeqCst);
        assert!(max >= 1);
        assert!(max <= workers, "{} concurrent creates with {} workers", max, workers);
        assert_eq!(summary.stats.nodes_restored, 18);
    }
}

#[test]
fn test_restore_into_prepopulated_destination() {
    let repo = Arc::new(MemoryRepository::new());
    let snap = scenario_a(&repo);

    let fresh = TempDir::new().unwrap();
    Restorer::new(repo.clone(), snap.clone(), RestoreConfig::with_workers(2))
        .restore_to(&CancellationToken::new(), fresh.path())
        .unwrap();

    let existing = TempDir::new().unwrap();
    fs::create_dir_all(existing.path().join("sub")).unwrap();
    fs::write(existing.path().join("a.txt"), b"stale and longer").unwrap();
    Restorer::new(repo.clone(), snap, RestoreConfig::with_workers(2))
        .restore_to(&CancellationToken::new(), existing.path())
        .unwrap();

    for rel in ["a.txt", "sub", "sub/b.txt"] {
        let a = fresh.path().join(rel);
        let b = existing.path().join(rel);
        assert_eq!(mtime(&a), mtime(&b), "mtime differs for {}", rel);
        if a.is_file() {
            assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
        }
    }
}

#[cfg(unix)]
#[test]
fn test_symlinked_directory_not_followed() {
    use std::os::unix::fs::PermissionsExt;

    let repo = Arc::new(MemoryRepository::new());
    let b = file(&repo, "b.txt", b"bee", 3);
    let subtree = repo.add_tree(&Tree::from_nodes(vec![b])).unwrap();
    let sub = Node::dir("sub", 0o750, time(4), subtree);
    let snap = snapshot(&repo, vec![file(&repo, "a.txt", b"alpha", 2), sub]);

    let dst = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    let outside_mode = fs::metadata(outside.path()).unwrap().permissions().mode();
    std::os::unix::fs::symlink(outside.path(), dst.path().join("sub")).unwrap();

    Restorer::new(repo.clone(), snap, RestoreConfig::with_workers(2))
        .restore_to(&CancellationToken::new(), dst.path())
        .unwrap();

    let sub_meta = fs::symlink_metadata(dst.path().join("sub")).unwrap();
    assert!(sub_meta.file_type().is_dir());
    assert_eq!(sub_meta.permissions().mode() & 0o777, 0o750);
    assert_eq!(fs::read(dst.path().join("sub/b.txt")).unwrap(), b"bee");

    assert!(!outside.path().join("b.txt").exists());
    let mode = fs::metadata(outside.path()).unwrap().permissions().mode();
    assert_eq!(mode, outside_mode);
}

/// False when running with privileges that ignore directory modes
#[cfg(unix)]
fn permissions_enforced() -> bool {
    use std::os::unix::fs::PermissionsExt;

    let check = TempDir::new().unwrap();
    let locked = check.path().join("locked");
    fs::create_dir(&locked).unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();
    let enforced = fs::write(locked.join("f"), b"").is_err();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    enforced
}

#[cfg(unix)]
#[test]
fn test_restore_twice_over_read_only_directory() {
    use std::os::unix::fs::PermissionsExt;

    if !permissions_enforced() {
        eprintln!("skipping: directory permissions are not enforced for this user");
        return;
    }

    let repo = Arc::new(MemoryRepository::new());
    let b = file(&repo, "b.txt", b"bee", 3);
    let subtree = repo.add_tree(&Tree::from_nodes(vec![b])).unwrap();
    let sub = Node::dir("sub", 0o555, time(4), subtree);
    let snap = snapshot(&repo, vec![sub]);
    let dst = TempDir::new().unwrap();

    for _ in 0..2 {
        Restorer::new(repo.clone(), snap.clone(), RestoreConfig::with_workers(2))
            .restore_to(&CancellationToken::new(), dst.path())
            .unwrap();
    }

    let sub_path = dst.path().join("sub");
    let mode = fs::metadata(&sub_path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o555);
    assert_eq!(fs::read(sub_path.join("b.txt")).unwrap(), b"bee");
    assert_eq!(mtime(&sub_path), SystemTime::from(time(4)));

    // let the temp dir clean up
    fs::set_permissions(&sub_path, fs::Permissions::from_mode(0o755)).unwrap();
}

#[test]
fn test_empty_directory_gets_metadata() {
    let repo = Arc::new(MemoryRepository::new());
    let empty = dir(&repo, "empty", 9, vec![]);
    let snap = snapshot(&repo, vec![empty]);
    let dst = TempDir::new().unwrap();

    let summary = Restorer::new(repo.clone(), snap, RestoreConfig::with_workers(1))
        .restore_to(&CancellationToken::new(), dst.path())
        .unwrap();

    assert!(dst.path().join("empty").is_dir());
    assert_eq!(mtime(&dst.path().join("empty")), SystemTime::from(time(9)));
    assert_eq!(summary.stats.dirs_restored, 1);
}

#[test]
fn test_invalid_names_routed_through_handler() {
    let repo = Arc::new(MemoryRepository::new());
    let snap = snapshot(
        &repo,
        vec![file(&repo, "..", b"escape", 2), file(&repo, "ok", b"ok", 2)],
    );

    let dst = TempDir::new().unwrap();
    let result = Restorer::new(repo.clone(), snap.clone(), RestoreConfig::with_workers(1))
        .restore_to(&CancellationToken::new(), dst.path());
    assert!(matches!(result, Err(RestoreError::InvalidNodeName { .. })));

    let dst = TempDir::new().unwrap();
    let warnings = Arc::new(CollectWarnings::new());
    let summary = Restorer::new(repo.clone(), snap, RestoreConfig::with_workers(1))
        .with_error_handler(warnings.clone())
        .restore_to(&CancellationToken::new(), dst.path())
        .unwrap();
    assert_eq!(warnings.count(), 1);
    assert_eq!(summary.stats.nodes_restored, 1);
    assert!(dst.path().join("ok").exists());
}

#[test]
fn test_duplicate_names_routed_through_handler() {
    let repo = Arc::new(MemoryRepository::new());
    let twin = dir(&repo, "twin", 3, vec![file(&repo, "inner", b"in", 2)]);
    let snap = snapshot(
        &repo,
        vec![file(&repo, "twin", b"file first", 2), twin, file(&repo, "ok", b"ok", 2)],
    );

    let dst = TempDir::new().unwrap();
    let result = Restorer::new(repo.clone(), snap.clone(), RestoreConfig::with_workers(1))
        .restore_to(&CancellationToken::new(), dst.path());
    match result {
        Err(RestoreError::DuplicateNodeName { name, .. }) => assert_eq!(name, "twin"),
        other => panic!("expected duplicate name error, got {:?}", other),
    }

    let dst = TempDir::new().unwrap();
    let warnings = Arc::new(CollectWarnings::new());
    let summary = Restorer::new(repo.clone(), snap, RestoreConfig::with_workers(1))
        .with_error_handler(warnings.clone())
        .restore_to(&CancellationToken::new(), dst.path())
        .unwrap();
    assert_eq!(warnings.count(), 1);
    assert_eq!(summary.stats.nodes_restored, 2);
    assert_eq!(fs::read(dst.path().join("twin")).unwrap(), b"file first");
}

#[test]
fn test_cancelled_before_start() {
    let repo = Arc::new(MemoryRepository::new());
    let snap = scenario_a(&repo);
    let dst = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = Restorer::new(repo.clone(), snap, RestoreConfig::with_workers(2))
        .restore_to(&cancel, dst.path());
    assert!(matches!(result, Err(RestoreError::Cancelled)));
    assert!(!dst.path().join("a.txt").exists());
}

#[test]
fn test_cancelled_during_restore() {
    let repo = Arc::new(MemoryRepository::new());
    let nodes = (0..50)
        .map(|i| file(&repo, &format!("f{}", i), b"payload", 2))
        .collect();
    let snap = snapshot(&repo, nodes);
    let dst = TempDir::new().unwrap();
    let cancel = CancellationToken::new();

    let mut restorer = Restorer::new(repo.clone(), snap, RestoreConfig::with_workers(2))
        .with_materializer(Arc::new(RecordingMaterializer::with_delay(
            Duration::from_millis(2),
        )));
    let trigger = cancel.clone();
    restorer.set_progress_callback(move |progress| {
        if progress.nodes_restored >= 3 {
            trigger.cancel();
        }
    });

    let result = restorer.restore_to(&cancel, dst.path());
    assert!(matches!(result, Err(RestoreError::Cancelled)));
    let restored = fs::read_dir(dst.path()).unwrap().count();
    assert!(restored < 50);
}

#[test]
fn test_invalid_worker_count_rejected() {
    let repo = Arc::new(MemoryRepository::new());
    let snap = scenario_a(&repo);
    let dst = TempDir::new().unwrap();

    let result = Restorer::new(repo.clone(), snap, RestoreConfig::with_workers(0))
        .restore_to(&CancellationToken::new(), dst.path());
    assert!(matches!(result, Err(RestoreError::InvalidConfig(_))));
}

#[test]
fn test_panicking_materializer_reported() {
    struct Panicking;

    impl NodeMaterializer for Panicking {
        fn create_at(
            &self,
            dest: &Path,
            _node: &Node,
            _blobs: &dyn BlobSource,
            _hardlinks: &HardlinkIndex,
        ) -> Result<(), MaterializeError> {
            if dest.ends_with("a.txt") {
                panic!("boom");
            }
            Ok(())
        }

        fn restore_metadata(&self, _dest: &Path, _node: &Node) -> Result<(), MaterializeError> {
            Ok(())
        }
    }

    let repo = Arc::new(MemoryRepository::new());
    let snap = scenario_a(&repo);
    let dst = TempDir::new().unwrap();

    let result = Restorer::new(repo.clone(), snap, RestoreConfig::with_workers(2))
        .with_materializer(Arc::new(Panicking))
        .restore_to(&CancellationToken::new(), dst.path());
    match result {
        Err(RestoreError::WorkerPanicked { message, .. }) => assert_eq!(message, "boom"),
        other => panic!("expected worker panic, got {:?}", other),
    }
}

#[test]
fn test_verify_after_restore() {
    let repo = Arc::new(MemoryRepository::new());
    let snap = scenario_a(&repo);
    let dst = TempDir::new().unwrap();
    let cancel = CancellationToken::new();

    let restorer = Restorer::new(repo.clone(), snap, RestoreConfig::with_workers(2));
    restorer.restore_to(&cancel, dst.path()).unwrap();

    let report = restorer.verify_files(&cancel, dst.path()).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.files_checked, 2);
    assert_eq!(report.bytes_checked, 8);

    fs::write(dst.path().join("sub/b.txt"), b"bez").unwrap();
    let report = restorer.verify_files(&cancel, dst.path()).unwrap();
    assert_eq!(report.issues.len(), 1);
    assert!(report.issues[0].path.ends_with("sub/b.txt"));
}
