//! Engine output parsing.
//!
//! The engine prints one `path: verdict` line per scanned file followed by
//! a summary block of `label: value` lines. Verdict lines (`OK`, `... FOUND`,
//! `... ERROR`) are split on their last `": "` so paths may contain colons;
//! every other line containing a colon is split on its first colon.

use crate::core::{key_for_local_path, AvError, AvResult, ScanResult, SIGNATURE_OK, SIGNATURE_UNKNOWN};

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// How an engine invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineExit {
    /// Exit code 0: nothing found.
    Clean,
    /// Exit code 1: at least one infection.
    Infected,
    /// Killed after exceeding the timeout; the output may be partial.
    TimedOut,
}

impl EngineExit {
    /// Maps a process exit code to an exit kind. Returns `None` for codes
    /// other than 0 and 1.
    pub fn from_code(code: Option<i32>) -> Option<Self> {
        match code {
            Some(0) => Some(Self::Clean),
            Some(1) => Some(Self::Infected),
            _ => None,
        }
    }
}

/// The parsed result of one engine invocation.
#[derive(Debug, Clone)]
pub struct EngineReport {
    /// Name of the engine that produced the report.
    pub engine: String,
    /// How the invocation ended.
    pub exit: EngineExit,
    /// Output lines split into key and value.
    pub fields: BTreeMap<String, String>,
    /// Captured output.
    pub raw_output: String,
    /// Wall time of the invocation.
    pub elapsed: Duration,
}

/// Files classified by a directory scan, keyed by path relative to the
/// scanned directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchFindings {
    /// Files reported `OK`.
    pub safe_files: Vec<String>,
    /// Files reported infected, mapped to the reported verdict.
    pub infected_files: BTreeMap<String, String>,
}

impl BatchFindings {
    /// Returns `true` when no file was classified.
    pub fn is_empty(&self) -> bool {
        self.safe_files.is_empty() && self.infected_files.is_empty()
    }
}

/// Splits engine output into `key -> trimmed value` pairs.
///
/// Later lines with the same key overwrite earlier ones.
pub fn parse_scan_output(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(split_line)
        .map(|(key, value)| (key.to_string(), value.trim().to_string()))
        .collect()
}

fn split_line(line: &str) -> Option<(&str, &str)> {
    if let Some((path, verdict)) = line.rsplit_once(": ") {
        let verdict = verdict.trim();
        if verdict == SIGNATURE_OK || verdict.ends_with("FOUND") || verdict.ends_with("ERROR") {
            return Some((path, verdict));
        }
    }
    line.split_once(':')
}

impl EngineReport {
    /// Builds a report from an exit kind and the captured output.
    pub fn new(engine: impl Into<String>, exit: EngineExit, output: String, elapsed: Duration) -> Self {
        Self {
            engine: engine.into(),
            exit,
            fields: parse_scan_output(&output),
            raw_output: output,
            elapsed,
        }
    }

    /// Returns `true` when the invocation was cut short.
    pub fn timed_out(&self) -> bool {
        self.exit == EngineExit::TimedOut
    }

    /// Returns the verdict for a single scanned file.
    ///
    /// A clean exit yields `OK`. An infected exit yields the value reported
    /// for `path`, or `UNKNOWN` when the file has no line of its own. A
    /// timed-out invocation is an error.
    pub fn result_for_file(&self, path: &Path) -> AvResult<ScanResult> {
        match self.exit {
            EngineExit::Clean => Ok(ScanResult::clean()),
            EngineExit::Infected => {
                let key = path.to_string_lossy();
                let signature = self
                    .fields
                    .get(key.as_ref())
                    .map(String::as_str)
                    .unwrap_or(SIGNATURE_UNKNOWN);
                Ok(ScanResult::infected(signature))
            }
            EngineExit::TimedOut => Err(AvError::EngineTimeout {
                engine: self.engine.clone(),
                elapsed: self.elapsed,
            }),
        }
    }

    /// Splits a directory scan into safe and infected files below `root`.
    ///
    /// Lines for archive members (`file!(n)`) and keys outside `root`, such
    /// as summary lines, are ignored. Verdicts other than `OK` or `...FOUND`
    /// are logged and skipped.
    pub fn partition(&self, root: &Path) -> BatchFindings {
        let mut findings = BatchFindings::default();
        for (key, value) in &self.fields {
            if key.contains("!(") {
                continue;
            }
            let Some(relative) = key_for_local_path(root, Path::new(key)) else {
                continue;
            };
            if value == SIGNATURE_OK {
                findings.safe_files.push(relative);
            } else if value.ends_with("FOUND") {
                findings.infected_files.insert(relative, value.clone());
            } else {
                tracing::warn!(
                    engine = %self.engine,
                    file = %relative,
                    verdict = %value,
                    "Unrecognized engine verdict, file left unclassified"
                );
            }
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BATCH_OUTPUT: &str = "\
/tmp/scandir/a.txt: Eicar-Test-Signature FOUND
/tmp/scandir/b.txt: OK
/tmp/scandir/c.zip!(1): Eicar-Test-Signature FOUND
/tmp/scandir/d.bin: Can't open file or directory ERROR

----------- SCAN SUMMARY -----------
Infected files: 1
Time: 0.012 sec (0 m 0 s)
";

    #[test]
    fn test_parse_scan_output() {
        let fields = parse_scan_output("/tmp/x: OK\nKnown viruses: 8000000\nno colon here\n");
        assert_eq!(fields.get("/tmp/x").map(String::as_str), Some("OK"));
        assert_eq!(fields.get("Known viruses").map(String::as_str), Some("8000000"));
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn test_value_keeps_later_colons() {
        let fields = parse_scan_output("Time: 0.012 sec (0 m 0 s): extra\n");
        assert_eq!(fields.get("Time").map(String::as_str), Some("0.012 sec (0 m 0 s): extra"));
    }

    #[test]
    fn test_verdict_lines_keep_colons_in_paths() {
        let output = "/tmp/scandir/upload 10:30:00.csv: Eicar-Test-Signature FOUND\n\
                      /tmp/scandir/log:2024.txt: OK\n\
                      Time: 0.012 sec (0 m 0 s)\n";
        let report = EngineReport::new(
            "mock",
            EngineExit::Infected,
            output.to_string(),
            Duration::ZERO,
        );
        assert_eq!(
            report.fields.get("Time").map(String::as_str),
            Some("0.012 sec (0 m 0 s)")
        );

        let findings = report.partition(Path::new("/tmp/scandir"));
        assert_eq!(findings.safe_files, vec!["log:2024.txt"]);
        assert_eq!(
            findings.infected_files.get("upload 10:30:00.csv").map(String::as_str),
            Some("Eicar-Test-Signature FOUND")
        );
        assert_eq!(
            report
                .result_for_file(Path::new("/tmp/scandir/upload 10:30:00.csv"))
                .unwrap()
                .signature,
            "Eicar-Test-Signature FOUND"
        );
    }

    #[test]
    fn test_partition() {
        let report = EngineReport::new(
            "mock",
            EngineExit::Infected,
            BATCH_OUTPUT.to_string(),
            Duration::from_millis(12),
        );
        let findings = report.partition(Path::new("/tmp/scandir"));
        assert_eq!(findings.safe_files, vec!["b.txt"]);
        assert_eq!(findings.infected_files.len(), 1);
        assert_eq!(
            findings.infected_files.get("a.txt").map(String::as_str),
            Some("Eicar-Test-Signature FOUND")
        );
    }

    #[test]
    fn test_result_for_file() {
        let path = Path::new("/tmp/scandir/a.txt");
        let infected = EngineReport::new(
            "mock",
            EngineExit::Infected,
            BATCH_OUTPUT.to_string(),
            Duration::ZERO,
        );
        assert_eq!(
            infected.result_for_file(path).unwrap(),
            ScanResult::infected("Eicar-Test-Signature FOUND")
        );

        let unreported = EngineReport::new("mock", EngineExit::Infected, String::new(), Duration::ZERO);
        assert_eq!(unreported.result_for_file(path).unwrap().signature, SIGNATURE_UNKNOWN);

        let clean = EngineReport::new("mock", EngineExit::Clean, String::new(), Duration::ZERO);
        assert!(clean.result_for_file(path).unwrap().is_clean());

        let timed_out = EngineReport::new("mock", EngineExit::TimedOut, String::new(), Duration::ZERO);
        assert!(matches!(
            timed_out.result_for_file(path),
            Err(AvError::EngineTimeout { .. })
        ));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(EngineExit::from_code(Some(0)), Some(EngineExit::Clean));
        assert_eq!(EngineExit::from_code(Some(1)), Some(EngineExit::Infected));
        assert_eq!(EngineExit::from_code(Some(2)), None);
        assert_eq!(EngineExit::from_code(None), None);
    }
}
