use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;
use std::thread;
use std::time::Duration;

/// Coverage state for one instrumented crate.
///
/// The three arrays are parallel: slot `i` of `names`, `lines` and `counts`
/// describes the function whose counter statement was written with index `i`.
pub struct Cover<const N: usize> {
    names: [&'static str; N],
    lines: [u32; N],
    counts: [AtomicBool; N],
    periodic: Once,
}

impl<const N: usize> Cover<N> {
    /// Build the state in a `static` initializer. `counts` is expected to
    /// start out all `false`.
    pub const fn new(
        names: [&'static str; N],
        lines: [u32; N],
        counts: [AtomicBool; N],
    ) -> Self {
        Cover {
            names,
            lines,
            counts,
            periodic: Once::new(),
        }
    }

    /// Mark function `index` as executed.
    ///
    /// Plain relaxed store: the flag only ever moves from `false` to `true`,
    /// so racing writers and a concurrent `collect` cannot produce a torn line.
    #[inline]
    pub fn hit(&self, index: usize) {
        self.counts[index].store(true, Ordering::Relaxed);
    }

    pub fn is_hit(&self, index: usize) -> bool {
        self.counts[index].load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        N
    }

    pub fn is_empty(&self) -> bool {
        N == 0
    }

    /// Write one `<name>:<line>:<covered>` line per function, in index order.
    pub fn write_to<W: Write>(&self, mut w: W) -> io::Result<()> {
        for i in 0..N {
            writeln!(
                w,
                "{}:{}:{}",
                self.names[i],
                self.lines[i],
                self.counts[i].load(Ordering::Relaxed)
            )?;
        }
        Ok(())
    }

    /// Rewrite the coverage file at `path` from the current state.
    ///
    /// Runs inside the instrumented program, so failures are reported on
    /// stderr instead of aborting it.
    pub fn collect(&self, path: &str) {
        if let Err(e) = self.write_file(Path::new(path)) {
            eprintln!("funccover-runtime: failed to write {}: {}", path, e);
        }
    }

    fn write_file(&self, path: &Path) -> io::Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        self.write_to(&mut w)?;
        w.flush()
    }

    /// Start a background thread that calls [`collect`](Self::collect)
    /// every `period` for the rest of the process. Only the first call per
    /// `Cover` spawns a thread.
    pub fn spawn_periodic(&'static self, period: Duration, path: &'static str) {
        if period.is_zero() {
            return;
        }
        self.periodic.call_once(|| {
            let spawned = thread::Builder::new()
                .name("funccover-collect".into())
                .spawn(move || loop {
                    thread::sleep(period);
                    self.collect(path);
                });
            if let Err(e) = spawned {
                eprintln!("funccover-runtime: failed to start periodic collection: {}", e);
            }
        });
    }

    /// Guard that collects to `path` when dropped.
    pub fn flush_on_drop<'a>(&'a self, path: &'a str) -> Flush<'a, N> {
        Flush { cover: self, path }
    }
}

/// Scope guard held by the entry function. Dropping it writes the coverage
/// file, whichever way the scope is left.
#[must_use = "the coverage file is written when the guard is dropped"]
pub struct Flush<'a, const N: usize> {
    cover: &'a Cover<N>,
    path: &'a str,
}

impl<const N: usize> Drop for Flush<'_, N> {
    fn drop(&mut self) {
        self.cover.collect(self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Instant;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("funccover_rt_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn three() -> Cover<3> {
        Cover::new(
            ["f1", "f2", "main"],
            [3, 4, 6],
            [
                AtomicBool::new(false),
                AtomicBool::new(false),
                AtomicBool::new(false),
            ],
        )
    }

    #[test]
    fn hit_marks_only_its_own_slot() {
        let cover = three();
        cover.hit(1);
        assert!(!cover.is_hit(0));
        assert!(cover.is_hit(1));
        assert!(!cover.is_hit(2));

        // Repeated hits are harmless.
        cover.hit(1);
        assert!(cover.is_hit(1));
    }

    #[test]
    fn write_to_emits_one_line_per_function_in_index_order() {
        let cover = three();
        cover.hit(0);
        cover.hit(2);

        let mut out = Vec::new();
        cover.write_to(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "f1:3:true\nf2:4:false\nmain:6:true\n"
        );
    }

    #[test]
    fn empty_cover_writes_nothing() {
        let cover: Cover<0> = Cover::new([], [], []);
        assert!(cover.is_empty());
        assert_eq!(cover.len(), 0);

        let path = scratch("empty.out");
        std::fs::write(&path, "stale\n").unwrap();
        cover.collect(path.to_str().unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn collect_truncates_previous_contents() {
        let cover = three();
        let path = scratch("truncate.out");
        std::fs::write(&path, "x".repeat(4096)).unwrap();

        cover.hit(0);
        cover.collect(path.to_str().unwrap());

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "f1:3:true\nf2:4:false\nmain:6:false\n");
    }

    #[test]
    fn collect_to_missing_directory_does_not_panic() {
        let cover = three();
        let path = scratch("no_such_dir").join("nested").join("cover.out");
        cover.collect(path.to_str().unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn flush_guard_collects_on_drop() {
        let cover = three();
        let path = scratch("guard.out");
        let path_str = path.to_str().unwrap().to_string();
        let _ = std::fs::remove_file(&path);
        {
            let _guard = cover.flush_on_drop(&path_str);
            cover.hit(2);
            assert!(!path.exists(), "nothing is written while the guard lives");
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.ends_with("main:6:true\n"), "got: {content}");
    }

    #[test]
    fn flush_guard_collects_during_unwind() {
        let cover = three();
        let path = scratch("unwind.out");
        let path_str = path.to_str().unwrap().to_string();
        let _ = std::fs::remove_file(&path);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = cover.flush_on_drop(&path_str);
            cover.hit(0);
            panic!("boom");
        }));
        assert!(result.is_err());
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("f1:3:true\n"), "got: {content}");
    }

    fn wait_for(path: &Path, expected: &str) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if std::fs::read_to_string(path).is_ok_and(|c| c == expected) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    static PERIODIC: Cover<2> = Cover::new(
        ["tick", "tock"],
        [10, 20],
        [AtomicBool::new(false), AtomicBool::new(false)],
    );

    #[test]
    fn spawn_periodic_keeps_rewriting_the_file() {
        let path = scratch("periodic.out");
        let _ = std::fs::remove_file(&path);
        let leaked: &'static str = Box::leak(path.to_str().unwrap().to_string().into_boxed_str());

        PERIODIC.spawn_periodic(Duration::from_millis(10), leaked);
        // A second start is a no-op.
        PERIODIC.spawn_periodic(Duration::from_millis(10), leaked);

        assert!(
            wait_for(&path, "tick:10:false\ntock:20:false\n"),
            "the periodic loop should write the initial state"
        );

        PERIODIC.hit(1);
        assert!(
            wait_for(&path, "tick:10:false\ntock:20:true\n"),
            "the periodic loop should pick up later hits"
        );
    }

    #[test]
    fn zero_period_never_spawns() {
        static IDLE: Cover<1> = Cover::new(["idle"], [1], [AtomicBool::new(false)]);
        let path = scratch("idle.out");
        let _ = std::fs::remove_file(&path);
        let leaked: &'static str = Box::leak(path.to_str().unwrap().to_string().into_boxed_str());

        IDLE.spawn_periodic(Duration::ZERO, leaked);
        thread::sleep(Duration::from_millis(50));
        assert!(!path.exists());
    }
}
