//! End-to-end deployment scenarios on the local backend.
#![cfg(target_family = "unix")]

use rundeploy::utils::test_utils::TempDir;
use rundeploy::vfs::VirtualDir;
use rundeploy::{
    deploy_runs, new_tmp_dir, runs_from_str, DeployOptions, Error, IfExists, Run,
};
use std::fs;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

static CONFIG: &str = r#"
runs:
  - id: 1
    name: run_test
    environment: unix

    input:
        scripts:
          - input/script.in
        variables:
          var1: value
        files:
          frag1: input/frag.in

    process:
        unix:
          run:
            - echo test_echo > output.txt
            - cat script.in > output2.txt

    output:
        path: output
"#;

fn seed_inputs(tmp: &TempDir) {
    tmp.join_and_write_file("input/script.in", "test @v{var1} @f{frag1}");
    tmp.join_and_write_file("input/frag.in", "replace frag");
}

fn parse_runs(config: &str) -> Vec<Run> {
    runs_from_str(config).unwrap()
}

fn remove_options() -> DeployOptions {
    DeployOptions {
        if_exists: IfExists::Remove,
        ..Default::default()
    }
}

#[test]
fn local_unix_happy_path() {
    init_logging();
    let tmp = new_tmp_dir!();
    seed_inputs(&tmp);
    deploy_runs(&parse_runs(CONFIG), tmp.dir(), &remove_options()).unwrap();

    let outdir = tmp.join("output/1_run_test");
    assert!(outdir.join("config_1.yaml").is_file());
    assert_eq!(
        fs::read_to_string(outdir.join("frag.in")).unwrap(),
        "replace frag"
    );
    assert_eq!(
        fs::read_to_string(outdir.join("script.in")).unwrap(),
        "test value replace frag"
    );
    assert_eq!(
        fs::read_to_string(outdir.join("output.txt")).unwrap(),
        "test_echo\n"
    );
    assert_eq!(
        fs::read_to_string(outdir.join("output2.txt")).unwrap(),
        "test value replace frag"
    );
}

#[test]
fn deploy_is_idempotent_under_remove() {
    init_logging();
    let tmp = new_tmp_dir!();
    seed_inputs(&tmp);
    let runs = parse_runs(CONFIG);
    deploy_runs(&runs, tmp.dir(), &remove_options()).unwrap();
    let list_once = list_tree(&tmp, "output/1_run_test");
    deploy_runs(&runs, tmp.dir(), &remove_options()).unwrap();
    let list_twice = list_tree(&tmp, "output/1_run_test");
    assert_eq!(list_once, list_twice);
    assert_eq!(
        fs::read_to_string(tmp.join("output/1_run_test/output2.txt")).unwrap(),
        "test value replace frag"
    );
}

fn list_tree(tmp: &TempDir, path: &str) -> Vec<String> {
    let mut dir = rundeploy::vfs::LocalDir::open(&tmp.join(path)).unwrap();
    let mut entries = dir.glob("**/*").unwrap();
    entries.sort();
    entries
}

#[test]
fn remove_and_rename_cleanup() {
    init_logging();
    let config = r#"
runs:
  - id: 1
    name: run_test
    environment: unix

    input:
        scripts:
          - input/script.in
        variables:
          var1: value
        files:
          frag1: input/frag.in

    process:
        unix:
          run:
            - echo test_echo > output.txt
            - cat script.in > output2.txt
            - mkdir -p subfolder
            - echo x > subfolder/to_delete.txt
            - echo x > subfolder/dont_delete.txt
            - mkdir -p deletefolder
            - echo y > deletefolder/some.text

    output:
        path: output
        remove:
          - "*/to_delete.txt"
          - deletefolder
          - tmp.*
        rename:
          2.txt: 2.other
"#;
    let tmp = new_tmp_dir!();
    seed_inputs(&tmp);
    deploy_runs(&parse_runs(config), tmp.dir(), &remove_options()).unwrap();

    let outdir = tmp.join("output/1_run_test");
    assert!(!outdir.join("subfolder/to_delete.txt").exists());
    assert!(!outdir.join("deletefolder").exists());
    assert!(outdir.join("subfolder/dont_delete.txt").is_file());
    assert!(outdir.join("output2.other").is_file());
    assert!(!outdir.join("output2.txt").exists());
    assert!(outdir.join("output.txt").is_file());
}

#[test]
fn rename_is_idempotent_on_a_renamed_directory() {
    init_logging();
    let config = r#"
runs:
  - id: 1
    name: run_test
    environment: unix
    input:
        scripts:
          - input/script.in
        variables:
          var1: value
        files:
          frag1: input/frag.in
    process:
        unix:
          run:
            - cat script.in > output2.txt
    output:
        path: output
        rename:
          2.txt: 2.other
"#;
    let tmp = new_tmp_dir!();
    seed_inputs(&tmp);
    let runs = parse_runs(config);
    deploy_runs(&runs, tmp.dir(), &remove_options()).unwrap();
    let outdir = tmp.join("output/1_run_test");
    assert!(outdir.join("output2.other").is_file());

    // a second pass over the already-renamed directory must change nothing
    let reuse = DeployOptions {
        if_exists: IfExists::Use,
        test_run: true,
        ..Default::default()
    };
    deploy_runs(&runs, tmp.dir(), &reuse).unwrap();
    assert!(outdir.join("output2.other").is_file());
    assert!(!outdir.join("output2.txt").exists());
    assert!(!outdir.join("output2.other.other").exists());
}

#[test]
fn missing_variable_fails_the_run() {
    init_logging();
    let tmp = new_tmp_dir!();
    tmp.join_and_write_file("input/script.in", "test @v{missing}");
    tmp.join_and_write_file("input/frag.in", "replace frag");
    let runs = parse_runs(CONFIG);
    match deploy_runs(&runs, tmp.dir(), &remove_options()) {
        Err(Error::RunsFailed(failed)) => {
            assert_eq!(failed, vec![(1, "run_test".to_string())]);
        }
        other => panic!("unexpected: {:?}", other.err()),
    }
    // the failing run produced no output directory
    assert!(!tmp.join("output/1_run_test").exists());
}

#[test]
fn abort_policy_fails_an_existing_directory() {
    init_logging();
    let tmp = new_tmp_dir!();
    seed_inputs(&tmp);
    tmp.join_and_write_file("output/1_run_test/marker.txt", "keep");
    let runs = parse_runs(CONFIG);
    let options = DeployOptions::default();
    assert!(matches!(
        deploy_runs(&runs, tmp.dir(), &options),
        Err(Error::RunsFailed(_))
    ));
    // abort leaves the directory untouched
    assert_eq!(
        fs::read_to_string(tmp.join("output/1_run_test/marker.txt")).unwrap(),
        "keep"
    );
}

#[test]
fn test_run_populates_without_executing() {
    init_logging();
    let tmp = new_tmp_dir!();
    seed_inputs(&tmp);
    let options = DeployOptions {
        if_exists: IfExists::Remove,
        test_run: true,
        ..Default::default()
    };
    deploy_runs(&parse_runs(CONFIG), tmp.dir(), &options).unwrap();
    let outdir = tmp.join("output/1_run_test");
    assert!(outdir.join("config_1.yaml").is_file());
    assert!(outdir.join("script.in").is_file());
    assert!(!outdir.join("output.txt").exists());
}

#[test]
fn script_permission_bits_are_preserved() {
    use std::os::unix::fs::PermissionsExt;
    init_logging();
    let tmp = new_tmp_dir!();
    seed_inputs(&tmp);
    let script = tmp.join("input/script.in");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    deploy_runs(&parse_runs(CONFIG), tmp.dir(), &remove_options()).unwrap();
    let copied = tmp.join("output/1_run_test/script.in");
    assert_eq!(
        fs::metadata(&copied).unwrap().permissions().mode() & 0o777,
        0o755
    );
}

#[test]
fn qsub_run_emits_the_job_script() {
    init_logging();
    let config = r#"
runs:
  - id: 1
    name: run_test_name
    environment: qsub

    input:
        scripts:
          - input/script.in
        variables:
          var1: value
        files:
          frag1: input/frag.in

    process:
        qsub:
            walltime: "1:10"
            modules:
                - quantum-espresso
                - intel-suite
                - mpi
            run:
                - mpiexec pw.x -i script.in > main.qe.scf.out

    output:
        path: output
"#;
    let tmp = new_tmp_dir!();
    seed_inputs(&tmp);
    let options = DeployOptions {
        if_exists: IfExists::Remove,
        test_run: true,
        ..Default::default()
    };
    deploy_runs(&parse_runs(config), tmp.dir(), &options).unwrap();

    let script = fs::read_to_string(tmp.join("output/1_run_test_name/run.qsub")).unwrap();
    assert!(script.starts_with("#!/bin/bash --login\n"));
    assert!(script.contains("#PBS -N 1_run_test_nam\n"));
    assert!(script.contains("#PBS -l walltime=1:10:00\n"));
    assert!(script.contains("#PBS -l select=1:ncpus=16\n"));
    assert!(script.contains("module load quantum-espresso intel-suite mpi\n"));
    assert!(script.contains("cd $TMPDIR\n"));
}

#[test]
fn exec_failures_log_and_continue_without_fail_fast() {
    init_logging();
    let config = r#"
runs:
  - id: 1
    name: run_test
    environment: unix
    process:
        unix:
          run:
            - "false"
            - echo survived > after.txt
    output:
        path: output
"#;
    let tmp = new_tmp_dir!();
    let runs = parse_runs(config);

    deploy_runs(&runs, tmp.dir(), &remove_options()).unwrap();
    assert!(tmp.join("output/1_run_test/after.txt").is_file());

    // fail-fast stops the run at the first failing command
    let options = DeployOptions {
        if_exists: IfExists::Remove,
        exec_errors: true,
        ..Default::default()
    };
    match deploy_runs(&runs, tmp.dir(), &options) {
        Err(Error::RunsFailed(failed)) => assert_eq!(failed.len(), 1),
        other => panic!("unexpected: {:?}", other.err()),
    }
    assert!(!tmp.join("output/1_run_test/after.txt").exists());
}

#[test]
fn runs_are_processed_in_order_and_failures_aggregate() {
    init_logging();
    let config = r#"
runs:
  - id: 1
    name: ok_run
    environment: unix
    process:
        unix:
          run:
            - echo ok > ok.txt
    output:
        path: output
  - id: 2
    name: bad_run
    environment: unix
    input:
        scripts:
          - input/does_not_exist.in
    output:
        path: output
"#;
    let tmp = new_tmp_dir!();
    let runs = parse_runs(config);
    match deploy_runs(&runs, tmp.dir(), &remove_options()) {
        Err(Error::RunsFailed(failed)) => {
            assert_eq!(failed, vec![(2, "bad_run".to_string())]);
        }
        other => panic!("unexpected: {:?}", other.err()),
    }
    // the first run still deployed
    assert!(tmp.join("output/1_ok_run/ok.txt").is_file());
}
