// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::error::Error;

use super::{AuthInfo, AuthMode};

fn bearer(project: &str) -> AuthInfo {
    AuthInfo { mode: AuthMode::Bearer, project: Some(project.to_owned()) }
}

fn loopback() -> AuthInfo {
    AuthInfo { mode: AuthMode::Loopback, project: None }
}

#[test]
fn bearer_requires_matching_project() {
    let info = bearer("p");
    assert_eq!(info.resolve_project(Some("p")).ok().as_deref(), Some("p"));
    assert!(matches!(info.resolve_project(Some("q")), Err(Error::ForbiddenProject(_))));
    assert!(matches!(info.resolve_project(None), Err(Error::ForbiddenProject(_))));
}

#[test]
fn loopback_honours_requested_project() {
    let info = loopback();
    assert_eq!(info.resolve_project(Some("anything")).ok().as_deref(), Some("anything"));
    assert_eq!(info.resolve_project(None).ok().as_deref(), Some(""));
}

#[test]
fn scope_is_empty_for_loopback() {
    assert_eq!(loopback().scope(), "");
    assert_eq!(bearer("p").scope(), "p");
}

#[test]
fn check_project_guards_record_access() {
    let info = bearer("p");
    assert!(info.check_project("p").is_ok());
    assert!(matches!(info.check_project("q"), Err(Error::ForbiddenProject(_))));

    // Loopback reaches any record.
    assert!(loopback().check_project("q").is_ok());
}
