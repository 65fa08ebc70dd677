//! Backend coherence: both backends expose the identical operation set
//! (enforced by the trait), and the trait object drives a full session.
#![cfg(target_family = "unix")]

use rundeploy::new_tmp_dir;
use rundeploy::vfs::{open_dir, LocalDir, RemoteDir, VirtualDir};

// compile-time half of the coherence check
fn assert_backend<T: VirtualDir>() {}

#[test]
fn local_and_remote_implement_the_same_contract() {
    assert_backend::<LocalDir>();
    assert_backend::<RemoteDir>();
}

#[test]
fn a_session_is_driven_through_the_trait_object() {
    let tmp = new_tmp_dir!();
    let mut dir: Box<dyn VirtualDir> = open_dir("work", None, tmp.dir()).unwrap();

    dir.make_dirs("sub/deep").unwrap();
    dir.write_bytes("sub/file.txt", b"content").unwrap();
    assert!(dir.exists("sub/file.txt"));
    assert!(dir.is_file("sub/file.txt"));
    assert!(dir.is_dir("sub/deep"));
    assert_eq!(dir.stat("sub/file.txt").unwrap().size, 7);
    dir.chmod("sub/file.txt", 0o600).unwrap();
    assert!(dir.get_abs("sub").unwrap().ends_with("work/sub"));
    assert_eq!(dir.read_string("sub/file.txt").unwrap(), "content");

    dir.copy("sub/file.txt", "sub/deep").unwrap();
    assert!(dir.is_file("sub/deep/file.txt"));
    dir.rename("sub/deep/file.txt", "renamed.txt").unwrap();
    assert!(dir.is_file("sub/deep/renamed.txt"));

    let mut matches = dir.glob("**/*.txt").unwrap();
    matches.sort();
    assert_eq!(matches, vec!["sub/deep/renamed.txt", "sub/file.txt"]);
    assert_eq!(dir.iter_dir("sub/deep").unwrap(), vec!["sub/deep/renamed.txt"]);

    assert!(dir.exec_cmnd("echo made > made.txt", "sub", true, None).unwrap());
    assert!(dir.is_file("sub/made.txt"));

    dir.remove("sub/deep/renamed.txt").unwrap();
    dir.remove("sub/deep").unwrap();
    dir.rmtree("sub").unwrap();
    assert!(!dir.exists("sub"));
}
