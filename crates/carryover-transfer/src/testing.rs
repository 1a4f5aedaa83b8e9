//! Shared test doubles.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::BoxFuture;
use crate::auth::{AuthData, CredentialStore, TokenRefresher, TokenResponse};
use crate::error::TransferResult;

/// Hands out `access-1`, `access-2`, ... and counts how often it ran.
#[derive(Default)]
pub(crate) struct CountingRefresher {
    calls: AtomicUsize,
}

impl CountingRefresher {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TokenRefresher for CountingRefresher {
    fn refresh<'a>(
        &'a self,
        _token_url: &'a str,
        _refresh_token: &'a str,
    ) -> BoxFuture<'a, TransferResult<TokenResponse>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(TokenResponse {
                access_token: format!("access-{}", n),
                refresh_token: None,
                expires_in: Some(3600),
            })
        })
    }
}

/// A credential store already holding `access-0`.
pub(crate) fn session() -> (Arc<CountingRefresher>, Arc<CredentialStore>) {
    let refresher = Arc::new(CountingRefresher::default());
    let store = Arc::new(CredentialStore::new(refresher.clone()));
    let auth_data = AuthData::new("access-0", "refresh", "https://idp.example.com/token");
    store.get_or_create_credential(&auth_data).unwrap();
    (refresher, store)
}
