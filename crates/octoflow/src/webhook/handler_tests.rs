//! Tests for handler context and adapters.

use super::*;
use crate::client::{ClientOptions, Credentials};
use crate::error::AuthError;
use std::sync::atomic::{AtomicUsize, Ordering};

fn envelope(body: &[u8]) -> Arc<EventEnvelope> {
    Arc::new(EventEnvelope::parse("delivery-1", "issues", body).unwrap())
}

mod context_tests {
    use super::*;

    #[test]
    fn test_context_exposes_event_fields() {
        let context = Context::new(
            envelope(br#"{"action":"labeled","installation":{"id":77}}"#),
            None,
        );

        assert_eq!(context.id(), "delivery-1");
        assert_eq!(context.name().to_string(), "issues.labeled");
        assert_eq!(context.installation_id(), Some(InstallationId::new(77)));
        assert_eq!(context.payload().action.as_deref(), Some("labeled"));
    }

    #[test]
    fn test_repo_prefers_owner_login() {
        let context = Context::new(
            envelope(br#"{"repository":{"name":"Hello-World","owner":{"login":"octocat"}}}"#),
            None,
        );

        assert_eq!(context.repo(), Some(("octocat", "Hello-World")));
    }

    #[test]
    fn test_repo_falls_back_to_full_name() {
        let context = Context::new(
            envelope(br#"{"repository":{"full_name":"octocat/Spoon-Knife"}}"#),
            None,
        );

        assert_eq!(context.repo(), Some(("octocat", "Spoon-Knife")));
    }

    #[test]
    fn test_repo_is_none_without_repository() {
        let context = Context::new(envelope(b"{}"), None);

        assert_eq!(context.repo(), None);
    }

    #[test]
    fn test_client_requires_factory() {
        let context = Context::new(envelope(b"{}"), None);

        assert!(matches!(
            context.client(),
            Err(AuthError::MissingCredentials { .. })
        ));
    }

    #[tokio::test]
    async fn test_client_uses_explicit_token_over_installation() {
        let factory = Arc::new(
            ClientFactory::new(ClientOptions::new().with_token("ghp_static")).unwrap(),
        );
        let context = Context::new(
            envelope(br#"{"installation":{"id":77}}"#),
            Some(factory),
        );

        let client = context.client().unwrap();

        assert!(matches!(client.credentials(), Credentials::Token(_)));
    }

    #[tokio::test]
    async fn test_installation_client_without_app_credentials_fails() {
        let factory = Arc::new(ClientFactory::new(ClientOptions::new()).unwrap());
        let context = Context::new(
            envelope(br#"{"installation":{"id":77}}"#),
            Some(factory),
        );

        assert!(matches!(
            context.client(),
            Err(AuthError::MissingCredentials { .. })
        ));
    }
}

mod adapter_tests {
    use super::*;

    #[tokio::test]
    async fn test_handler_fn_runs_closure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler = handler_fn(move |context: Context| {
            let counter = Arc::clone(&counter);
            async move {
                assert_eq!(context.name().base(), "issues");
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let context = Context::new(envelope(b"{}"), None);
        handler.handle(&context).await.unwrap();
        handler.handle(&context).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_handler_fn_propagates_errors() {
        let handler =
            handler_fn(|_context: Context| async move { Err::<(), BoxError>("nope".into()) });

        let result = handler.handle(&Context::new(envelope(b"{}"), None)).await;

        assert_eq!(result.unwrap_err().to_string(), "nope");
    }

    #[test]
    fn test_closures_are_error_handlers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler: Arc<dyn ErrorHandler> = Arc::new(move |error: &DispatchError| {
            assert_eq!(error.status_code(), 403);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        handler.handle_error(&DispatchError::Authentication(AuthError::SignatureMismatch));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
