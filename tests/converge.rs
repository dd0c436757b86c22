//! Exercises converge end to end against in-memory hosts: resolving trees of real resources,
//! applying them twice, and fanning out over several apps.
//!
//! The key property under test is convergence: a second run over an unchanged host only probes.

use converge::cache::{Cache, CachedContent};
use converge::children;
use converge::content::{Generated, Static};
use converge::core::resource::{Directory, File, IptablesRule, Service};
use converge::core::{Node, Runner};
use converge::network::fake::FakeHost;
use converge::network::Transport;
use converge::run_all::App;
use converge::{apply_all, CancellationToken};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn host() -> (Arc<FakeHost>, Arc<dyn Transport>) {
    let host = Arc::new(FakeHost::new());
    let transport: Arc<dyn Transport> = host.clone();
    (host, transport)
}

fn server(transport: &Arc<dyn Transport>) -> Node {
    Node::new("server").with_children(children![
        Directory::new(transport.clone(), "/d", 0o755),
        File::new(transport.clone(), "/d/f", Static::new("hi"), 0o644),
    ])
}

#[tokio::test]
async fn second_run_changes_nothing() {
    let (host, transport) = host();
    let runner = Runner::new(&server(&transport)).unwrap();
    let cancel = CancellationToken::new();

    runner.validate(&cancel).await.unwrap();
    assert!(host.commands().is_empty());

    runner.apply(&cancel).await.unwrap();
    assert_eq!(
        vec![
            "mkdir -p /d".to_string(),
            "chmod 00755 /d".to_string(),
            "cat > /d/f".to_string(),
        ],
        host.mutations(),
    );
    assert_eq!(Some(b"hi".to_vec()), host.file("/d/f"));

    host.clear_commands();
    runner.apply(&cancel).await.unwrap();
    assert!(host.mutations().is_empty(), "{:?}", host.mutations());
    assert!(!host.commands().is_empty());
}

#[tokio::test]
async fn full_server_converges() {
    let (host, transport) = host();
    let tree = Node::new("web").with_children(children![
        Directory::new(transport.clone(), "/etc/nginx", 0o755).owned_by("root", "root"),
        File::new(
            transport.clone(),
            "/etc/nginx/nginx.conf",
            Static::new("events {}\n"),
            0o640,
        )
        .owned_by("root", "www-data"),
        Service::new(transport.clone(), "nginx"),
        IptablesRule::allow_input(transport.clone(), 443, "tcp"),
    ]);
    let runner = Runner::new(&tree).unwrap();
    let cancel = CancellationToken::new();

    runner.validate(&cancel).await.unwrap();
    runner.apply(&cancel).await.unwrap();

    {
        let state = host.state();
        assert_eq!(Some(&0o640), state.modes.get("/etc/nginx/nginx.conf"));
        assert_eq!(
            Some(&"root:www-data".to_string()),
            state.owners.get("/etc/nginx/nginx.conf")
        );
        assert!(state.active.contains("nginx"));
        assert!(state.enabled.contains("nginx"));
        assert_eq!(vec!["INPUT -p tcp --dport 443 -j ACCEPT"], state.rules);
    }

    host.clear_commands();
    runner.apply(&cancel).await.unwrap();
    assert!(host.mutations().is_empty(), "{:?}", host.mutations());
}

#[tokio::test]
async fn failed_run_resumes() {
    let (host, transport) = host();
    host.fail_on("cat > /d/f");
    let runner = Runner::new(&server(&transport)).unwrap();
    let cancel = CancellationToken::new();

    let error = runner.apply(&cancel).await.unwrap_err();
    assert!(format!("{error:#}").contains("in server -> File(/d/f) -> FileContent(/d/f)"));

    host.state().fail_on.clear();
    host.clear_commands();
    runner.apply(&cancel).await.unwrap();

    // The directory finished last time and is only probed now.
    assert_eq!(vec!["cat > /d/f".to_string()], host.mutations());
}

#[tokio::test]
async fn generated_content_is_stable() {
    let (host, transport) = host();
    let dir = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let key = CachedContent::new(
        &Cache::new(dir.path()),
        ["web", "tls.key"],
        Generated::new(move || {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!("key-{call}").into_bytes())
        }),
    );
    let tree = Node::new("tls").with_children(children![
        key.clone(),
        File::new(transport.clone(), "/etc/tls.key", key, 0o600),
    ]);
    let runner = Runner::new(&tree).unwrap();
    let cancel = CancellationToken::new();

    runner.apply(&cancel).await.unwrap();
    host.clear_commands();
    runner.apply(&cancel).await.unwrap();

    assert_eq!(1, calls.load(Ordering::SeqCst));
    assert_eq!(Some(b"key-0".to_vec()), host.file("/etc/tls.key"));
    assert!(host.mutations().is_empty());
}

#[tokio::test]
async fn apply_all_isolates_apps() {
    let (up, up_transport) = host();
    let (down, down_transport) = host();
    down.set_unreachable(true);
    let (invalid, invalid_transport) = host();

    let apps = vec![
        App::new("up", server(&up_transport)),
        App::new("down", server(&down_transport)),
        App::new(
            "invalid",
            File::new(invalid_transport, "relative/path", Static::new("x"), 0o644),
        ),
    ];

    let errors = apply_all(&apps, &CancellationToken::new())
        .await
        .unwrap_err();

    let mut names: Vec<_> = errors.iter().map(|(name, _)| name.as_str()).collect();
    names.sort();
    assert_eq!(vec!["down", "invalid"], names);
    assert_eq!(Some(b"hi".to_vec()), up.file("/d/f"));
    assert!(invalid.commands().is_empty());
}
