use super::*;

#[tokio::test]
async fn file_backed_session_survives_restart_until_invalidated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("auth").join("session");

    let session = Session::load(&path).expect("load");
    assert!(!session.is_authenticated().await);
    session
        .sign_in("token-1", Some("ana".to_string()))
        .await
        .expect("sign in");

    let restored = Session::load(&path).expect("reload");
    assert_eq!(restored.token().await.as_deref(), Some("token-1"));
    assert_eq!(restored.identity().await, None);

    restored.invalidate().await;
    assert!(!restored.is_authenticated().await);
    assert!(!path.exists());
}

#[tokio::test]
async fn author_falls_back_when_identity_unknown() {
    let session = Session::with_token("t");
    assert_eq!(session.author_name().await, UNKNOWN_AUTHOR);
    session.set_identity("bo").await;
    assert_eq!(session.author_name().await, "bo");
}

#[test]
fn blank_session_file_is_unauthenticated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("session");
    fs::write(&path, "  \n").expect("write");
    let session = Session::load(&path).expect("load");
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    assert!(!rt.block_on(session.is_authenticated()));
}
