//! Pull step tests against real repositories

use servmon::deploy::executor::Deployer;
use servmon::deploy::git::{GitError, PullOutcome, Repository};
use servmon::errors::StepError;

use crate::support::{commit_file, git, init_remote, Fixture};

#[tokio::test]
async fn test_pull_without_new_commits_is_a_no_op() {
    let fixture = Fixture::new();
    init_remote(&fixture.root, &fixture.git);
    let before = git(&fixture.git, &["rev-parse", "HEAD"]);

    let outcome = Repository::open(&fixture.git).pull("master").await.unwrap();

    assert_eq!(outcome, PullOutcome::UpToDate);
    assert_eq!(git(&fixture.git, &["rev-parse", "HEAD"]), before);
}

#[tokio::test]
async fn test_pull_fast_forwards_to_remote() {
    let fixture = Fixture::new();
    let remote = init_remote(&fixture.root, &fixture.git);
    let before = git(&fixture.git, &["rev-parse", "HEAD"]);

    let target = commit_file(&remote.seed, "code/map.dm", "/turf/floor\n", "Add map");
    git(&remote.seed, &["push", "-q", "origin", "master"]);

    let outcome = Repository::open(&fixture.git).pull("master").await.unwrap();

    assert_eq!(
        outcome,
        PullOutcome::FastForwarded {
            from: Some(before),
            to: target.clone()
        }
    );
    assert_eq!(git(&fixture.git, &["rev-parse", "HEAD"]), target);
    assert_eq!(git(&fixture.git, &["rev-parse", "refs/heads/master"]), target);
    assert!(fixture.git.join("code/map.dm").is_file());
}

#[tokio::test]
async fn test_pull_refuses_diverged_history() {
    let fixture = Fixture::new();
    let remote = init_remote(&fixture.root, &fixture.git);

    let local = commit_file(&fixture.git, "local.txt", "hotfix\n", "Local hotfix");
    commit_file(&remote.seed, "remote.txt", "feature\n", "Remote feature");
    git(&remote.seed, &["push", "-q", "origin", "master"]);

    let err = Repository::open(&fixture.git).pull("master").await.unwrap_err();
    assert!(matches!(err, GitError::Diverged(ref branch) if branch == "master"));

    assert_eq!(git(&fixture.git, &["rev-parse", "refs/heads/master"]), local);
    assert!(!fixture.git.join("remote.txt").exists());
}

#[tokio::test]
async fn test_deployer_reports_merge_conflict() {
    let fixture = Fixture::new();
    let remote = init_remote(&fixture.root, &fixture.git);

    commit_file(&fixture.git, "local.txt", "hotfix\n", "Local hotfix");
    commit_file(&remote.seed, "remote.txt", "feature\n", "Remote feature");
    git(&remote.seed, &["push", "-q", "origin", "master"]);

    let record = fixture.record("Main");
    let err = Deployer::default().pull(&record).await.unwrap_err();
    assert!(matches!(err, StepError::MergeConflict { ref branch } if branch == "master"));
}

#[tokio::test]
async fn test_pull_creates_missing_local_branch() {
    let fixture = Fixture::new();
    let remote = init_remote(&fixture.root, &fixture.git);

    git(&remote.seed, &["checkout", "-q", "-b", "dev"]);
    let target = commit_file(&remote.seed, "dev.txt", "wip\n", "Dev work");
    git(&remote.seed, &["push", "-q", "origin", "dev"]);

    let outcome = Repository::open(&fixture.git).pull("dev").await.unwrap();

    assert_eq!(
        outcome,
        PullOutcome::FastForwarded {
            from: None,
            to: target.clone()
        }
    );
    assert_eq!(git(&fixture.git, &["rev-parse", "HEAD"]), target);
    assert_eq!(git(&fixture.git, &["symbolic-ref", "--short", "HEAD"]), "dev");
}

#[tokio::test]
async fn test_pull_requires_origin() {
    let fixture = Fixture::new();
    git(&fixture.git, &["init", "-q"]);

    let err = Repository::open(&fixture.git).pull("master").await.unwrap_err();
    assert!(matches!(err, GitError::RemoteNotFound(ref remote) if remote == "origin"));
}
