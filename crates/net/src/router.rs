use axum::{handler::Handler, routing::get, routing::post, Router};

/// Merges per-route components into one router and attaches the state.
///
/// Components registered on the same path with different methods are
/// merged into a single method router by axum.
pub fn main_router<STATE>(components: Vec<(String, Router<STATE>)>, state: STATE) -> Router
where
    STATE: Clone + Send + Sync + 'static,
{
    let mut app = Router::<STATE>::new();

    for (_, router) in components {
        app = app.merge(router);
    }

    app.with_state(state)
}

pub fn get_router_builder<T, S>(
    path: &str,
    handler: impl Handler<T, S> + Clone + Send + 'static,
) -> (String, Router<S>)
where
    T: 'static,
    S: Clone + Send + Sync + 'static,
{
    (path.to_string(), Router::<S>::new().route(path, get(handler)))
}

pub fn post_router_builder<T, S>(
    path: &str,
    handler: impl Handler<T, S> + Clone + Send + 'static,
) -> (String, Router<S>)
where
    T: 'static,
    S: Clone + Send + Sync + 'static,
{
    (path.to_string(), Router::<S>::new().route(path, post(handler)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        extract::State,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    #[derive(Clone)]
    struct Greeting(&'static str);

    async fn hello_handler(State(greeting): State<Greeting>) -> String {
        greeting.0.to_string()
    }

    async fn echo_handler(body: String) -> String {
        body
    }

    #[tokio::test]
    async fn test_get_and_post_share_a_path() -> Result<(), Box<dyn std::error::Error>> {
        let (path, get_component) = get_router_builder("/hello", hello_handler);
        assert_eq!(path, "/hello");
        let post_component = post_router_builder("/hello", echo_handler);

        let app = main_router(vec![(path, get_component), post_component], Greeting("hi"));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/hello").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&to_bytes(response.into_body(), usize::MAX).await?[..], b"hi");

        let response = app
            .oneshot(Request::builder().method("POST").uri("/hello").body(Body::from("ping"))?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&to_bytes(response.into_body(), usize::MAX).await?[..], b"ping");
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() -> Result<(), Box<dyn std::error::Error>> {
        let app = main_router(vec![get_router_builder("/hello", hello_handler)], Greeting("hi"));

        let response = app
            .oneshot(Request::builder().uri("/missing").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        Ok(())
    }
}
