#![allow(dead_code)]

use chrono::Utc;
use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

pub fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "drift_it_{}_{}_{}",
        tag,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    fs::create_dir_all(&dir).expect("temp dir");
    dir
}

/// Writes an executable `/bin/sh` script standing in for the engine.
pub fn write_engine(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o755)
        .open(&path)
        .expect("create engine script");
    file.write_all(format!("#!/bin/sh\n{}\n", body).as_bytes())
        .expect("write engine script");
    file.sync_all().expect("sync engine script");
    drop(file);
    path
}

/// A grid engine: three unit boxes, the last one widening by one unit per
/// snapshot. `printspf` echoes its frame count as the first counter.
///
/// `slow_query` sleeps one second before the performance reply that follows
/// the given snapshot number (baseline is 0, step `i` is `i + 1`).
/// `mute_query` never answers that performance request.
/// `crash_query` exits instead of writing that snapshot.
pub struct GridEngine {
    pub slow_query: Option<u32>,
    pub mute_query: Option<u32>,
    pub crash_query: Option<u32>,
}

impl GridEngine {
    pub fn plain() -> Self {
        Self {
            slow_query: None,
            mute_query: None,
            crash_query: None,
        }
    }

    pub fn script(&self) -> String {
        let num = |v: Option<u32>| v.map(|n| n.to_string()).unwrap_or_else(|| "-1".to_string());
        format!(
            r#"n=0
slow={slow}
mute={mute}
crash={crash}
while IFS= read -r line; do
  set -- $line
  case "$1" in
    querygpubounds)
      if [ "$n" = "$crash" ]; then exit 3; fi
      printf '# id\tx\ty\tw\th\n1\t0\t0\t1\t1\n2\t2\t0\t1\t1\n3\t4\t0\t%s\t1\n' "$((n + 1))" > "$2"
      n=$((n + 1))
      ;;
    printbounds)
      printf '0\t0\t1\t1\n'
      ;;
    loop)
      if [ "$3" = "printspf" ]; then
        if [ "$((n - 1))" = "$mute" ]; then continue; fi
        if [ "$((n - 1))" = "$slow" ]; then sleep 1; fi
        printf '%s\t0.016\t0.010\t0.012\n' "$2"
      fi
      ;;
    quit)
      exit 0
      ;;
  esac
done
"#,
            slow = num(self.slow_query),
            mute = num(self.mute_query),
            crash = num(self.crash_query),
        )
    }
}
