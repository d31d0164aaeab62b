#![allow(dead_code)]

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::mpsc;
use std::thread;

use axum::Router;
use tempfile::TempDir;
use tokio::sync::oneshot;

/// Compiles a small mock binary from source so suites can be exercised
/// without the real verifier around.
pub struct TempBinary {
    _dir: TempDir,
    path: PathBuf,
}

impl TempBinary {
    pub fn new(name: &str, source: &str) -> Self {
        let dir = TempDir::new().expect("create temp dir for binary");
        let src_path = dir.path().join(format!("{name}.rs"));
        std::fs::write(&src_path, source).expect("write mock binary source");

        let bin_path = dir
            .path()
            .join(format!("{name}{}", std::env::consts::EXE_SUFFIX));

        let rustc = env::var("RUSTC").unwrap_or_else(|_| "rustc".into());
        let status = Command::new(rustc)
            .arg("--edition=2021")
            .arg(&src_path)
            .arg("-o")
            .arg(&bin_path)
            .status()
            .expect("invoke rustc");
        assert!(
            status.success(),
            "rustc failed to build mock binary with status {status}"
        );

        Self {
            _dir: dir,
            path: bin_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Mock HTTP API on an ephemeral local port.
///
/// The suites under test are blocking, so the server runs on its own thread
/// with a single-threaded runtime and shuts down when dropped.
pub struct MockServer {
    base_url: String,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MockServer {
    pub fn start(router: Router) -> Self {
        let (addr_tx, addr_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let thread = thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("build mock server runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind mock server listener");
                let addr = listener.local_addr().expect("mock server addr");
                addr_tx.send(addr).expect("publish mock server addr");
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown_rx.await;
                    })
                    .await
                    .expect("mock server failed");
            });
        });
        let addr = addr_rx.recv().expect("receive mock server addr");
        Self {
            base_url: format!("http://{addr}"),
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
