//! Kept in its own binary: it sets `RESTLINE_MODE` for the whole process.

mod common;

use common::{body_text, send};
use restline::config::{MODE_ENV, Mode};
use restline::{App, Config, Fault, IncomingRequest, Input, Method, Next, StatusCode, handlers};

async fn leak(_input: Input, _next: Next) -> Result<(), Fault> {
    Err(Fault::msg("internal secret"))
}

#[tokio::test]
async fn mode_env_applies_to_a_config_built_in_code() {
    // SAFETY: the only test in this binary, set before anything reads the environment.
    unsafe { std::env::set_var(MODE_ENV, "production") };

    let mut app = App::new(Config::default()).unwrap();
    assert_eq!(app.config().mode, Mode::Production);
    app.get("/secret", handlers![leak]).unwrap();
    let dispatcher = app.into_dispatcher();

    let res = send(&dispatcher, IncomingRequest::new(Method::GET, "/secret")).await;
    assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(&res), "");
}
