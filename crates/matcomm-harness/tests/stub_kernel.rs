//! End-to-end harness tests against stub kernel executables.
//!
//! The stubs are small shell scripts honoring the positional CLI contract
//! `<world_size> <rank_id> <endpoint> <device_id_base> <M> <K> <N> [data_dir]`,
//! standing in for the real device kernel.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serial_test::serial;

use matcomm_common::case::{CommPattern, GenMode, QuantMode, ScaleKind, TestCase};
use matcomm_common::{DType, HarnessConfig, HarnessError};
use matcomm_harness::{CaseOutcome, CaseRunner};

fn write_stub(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("stub_kernel.sh");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn small_case() -> TestCase {
    TestCase {
        dtype: DType::F16,
        m: 8,
        k: 8,
        n: 8,
        batch_dims: vec![],
        world_size: 2,
        trans_a: false,
        trans_b: false,
        quant: QuantMode::None,
        bias: false,
        scale: ScaleKind::None,
        pattern: CommPattern::Allreduce,
    }
}

fn runner_with(kernel: PathBuf, data_root: &Path) -> CaseRunner {
    let config = HarnessConfig {
        gen_mode: GenMode::Deterministic,
        kernel_path: kernel,
        data_root: data_root.to_path_buf(),
        join_timeout: Some(Duration::from_secs(30)),
        ..HarnessConfig::default()
    };
    CaseRunner::new(config)
}

/// An echo kernel that copies golden to the output file passes verification.
#[test]
#[serial]
fn echo_kernel_passes_verification() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = write_stub(dir.path(), r#"cp "$8/golden.bin" "$8/shmem_output.bin""#);
    let runner = runner_with(kernel, dir.path());

    match runner.run_case(&small_case()) {
        CaseOutcome::Passed(report) => {
            assert_eq!(report.mismatched, 0);
            assert_eq!(report.within_tolerance_pct, 100.0);
        }
        other => panic!("expected pass, got {other:?}"),
    }
}

/// A kernel writing garbage of the right size fails with a tolerance
/// violation carrying diagnostics.
#[test]
#[serial]
fn wrong_output_fails_tolerance_with_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    // Deterministic golden is far from zero, so an all-zero output must fail.
    let kernel = write_stub(
        dir.path(),
        r#"size=$(wc -c < "$8/golden.bin")
head -c "$size" /dev/zero > "$8/shmem_output.bin""#,
    );
    let runner = runner_with(kernel, dir.path());

    match runner.run_case(&small_case()) {
        CaseOutcome::Failed(HarnessError::ToleranceViolation {
            mismatched, total, ..
        }) => {
            assert_eq!(mismatched, total);
        }
        other => panic!("expected tolerance violation, got {other:?}"),
    }
}

/// A non-zero exit from any rank fails the case before any tolerance
/// comparison, surfacing that rank's identity.
#[test]
#[serial]
fn rank_failure_preempts_verification() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = write_stub(
        dir.path(),
        r#"if [ "$2" = "1" ]; then
    echo "simulated device fault" >&2
    exit 3
fi
cp "$8/golden.bin" "$8/shmem_output.bin""#,
    );
    let runner = runner_with(kernel, dir.path());

    match runner.run_case(&small_case()) {
        CaseOutcome::Failed(HarnessError::RankProcessFailure { rank, code, log_path }) => {
            assert_eq!(rank, 1);
            assert_eq!(code, Some(3));
            let log = fs::read_to_string(log_path).unwrap();
            assert!(log.contains("simulated device fault"));
        }
        other => panic!("expected rank failure, got {other:?}"),
    }
}

/// On first failure the orchestrator broadcasts a cooperative cancellation
/// marker; a sibling polling for it exits cleanly and is never killed.
#[test]
#[serial]
fn failure_broadcasts_cooperative_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = write_stub(
        dir.path(),
        r#"if [ "$2" = "0" ]; then
    exit 1
fi
for _ in $(seq 1 100); do
    if [ -f "$8/cancel.signal" ]; then
        exit 0
    fi
    sleep 0.1
done
exit 7"#,
    );
    let runner = runner_with(kernel, dir.path());

    let case = small_case();
    match runner.run_case(&case) {
        CaseOutcome::Failed(HarnessError::RankProcessFailure { rank, .. }) => {
            assert_eq!(rank, 0);
        }
        other => panic!("expected rank 0 failure, got {other:?}"),
    }

    let layout = matcomm_harness::CaseLayout::new(dir.path(), &case);
    assert!(layout.rank_dir(1).join("cancel.signal").is_file());
}

/// A hung rank is reaped once the configured join timeout expires.
#[test]
#[serial]
fn hung_rank_hits_join_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = write_stub(
        dir.path(),
        r#"if [ "$2" = "1" ]; then
    sleep 60
fi
cp "$8/golden.bin" "$8/shmem_output.bin""#,
    );
    let config = HarnessConfig {
        gen_mode: GenMode::Deterministic,
        kernel_path: kernel,
        data_root: dir.path().to_path_buf(),
        join_timeout: Some(Duration::from_secs(2)),
        ..HarnessConfig::default()
    };
    let runner = CaseRunner::new(config);

    match runner.run_case(&small_case()) {
        CaseOutcome::Failed(HarnessError::JoinTimeout { rank, .. }) => {
            assert_eq!(rank, 1);
        }
        other => panic!("expected join timeout, got {other:?}"),
    }
}

/// A second run of the same parameters reuses the cached case directory.
#[test]
#[serial]
fn case_data_is_cached_by_parameter_hash() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = write_stub(dir.path(), r#"cp "$8/golden.bin" "$8/shmem_output.bin""#);
    let runner = runner_with(kernel, dir.path());
    let case = small_case();

    let layout = runner.prepare(&case).unwrap();
    let a_path = layout.rank_dir(0).join("a_gm.bin");
    let before = fs::metadata(&a_path).unwrap().modified().unwrap();

    // prepare() again must not rewrite the files.
    std::thread::sleep(Duration::from_millis(20));
    runner.prepare(&case).unwrap();
    let after = fs::metadata(&a_path).unwrap().modified().unwrap();
    assert_eq!(before, after);

    assert!(runner.run_case(&case).is_pass());
}

/// A case dir left with only the descriptor (interrupted generation) is
/// regenerated rather than reused as a complete cache.
#[test]
#[serial]
fn partial_case_dir_is_regenerated_on_prepare() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = write_stub(dir.path(), r#"cp "$8/golden.bin" "$8/shmem_output.bin""#);
    let runner = runner_with(kernel, dir.path());
    let case = small_case();

    let layout = matcomm_harness::CaseLayout::new(dir.path(), &case);
    fs::create_dir_all(layout.case_dir()).unwrap();
    fs::write(
        layout.case_dir().join("case.json"),
        serde_json::to_vec_pretty(&case).unwrap(),
    )
    .unwrap();

    runner.prepare(&case).unwrap();
    for rank in 0..case.world_size {
        assert!(layout.rank_dir(rank).join("a_gm.bin").is_file());
        assert!(layout.rank_dir(rank).join("golden.bin").is_file());
    }
    assert!(runner.run_case(&case).is_pass());
}

/// Batch execution aggregates outcomes.
#[test]
#[serial]
fn batch_summary_aggregates_outcomes() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = write_stub(dir.path(), r#"cp "$8/golden.bin" "$8/shmem_output.bin""#);
    let runner = runner_with(kernel, dir.path());

    let mut other = small_case();
    other.pattern = CommPattern::MatmulReduceScatter;
    let cases = vec![small_case(), other];

    let (summary, outcomes) = runner.run_batch(&cases);
    assert_eq!(summary.total(), 2);
    assert_eq!(summary.passed, 2);
    assert!(summary.all_passed());
    assert!(outcomes.iter().all(CaseOutcome::is_pass));
}
