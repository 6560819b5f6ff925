use std::convert::Infallible;

use log::info;
use serde::Deserialize;
use warp::{http::Uri, reply::Response, Filter, Rejection, Reply};

use crate::{
    error::handle_rejection,
    session::{self, Session, SESSION_COOKIE},
    user_connected, views, AppState,
};

/// Largest login form we accept.
const FORM_LIMIT: u64 = 16 * 1024;

#[derive(Debug, Deserialize)]
struct LoginForm {
    #[serde(default)]
    username: String,
}

fn with_state(
    state: AppState,
) -> impl warp::Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn session_id() -> impl warp::Filter<Extract = (Option<String>,), Error = Infallible> + Clone {
    warp::cookie::optional::<String>(SESSION_COOKIE)
}

fn redirect_home() -> impl Reply {
    warp::redirect::found(Uri::from_static("/"))
}

async fn index(sid: Option<String>, state: AppState) -> Result<impl Reply, Rejection> {
    let username = state.current_user(sid.as_deref()).await?;
    Ok(warp::reply::html(views::index(username.as_deref())))
}

async fn login(
    sid: Option<String>,
    form: LoginForm,
    state: AppState,
) -> Result<Response, Rejection> {
    let username = form.username.trim();
    if username.is_empty() {
        return Ok(warp::reply::html(views::login()).into_response());
    }

    // Always hand out a fresh id on login.
    if let Some(old) = sid {
        state.sessions.destroy(&old).await?;
    }
    let id = session::new_session_id();
    state
        .sessions
        .save(
            &id,
            &Session {
                username: username.to_owned(),
            },
        )
        .await?;
    info!("{} logged in", username);

    Ok(warp::reply::with_header(
        redirect_home(),
        "set-cookie",
        session::session_cookie(&id, state.session_ttl),
    )
    .into_response())
}

async fn logout(sid: Option<String>, state: AppState) -> Result<impl Reply, Rejection> {
    if let Some(sid) = sid {
        if let Some(username) = state.current_user(Some(&sid)).await? {
            info!("{} logged out", username);
        }
        state.sessions.destroy(&sid).await?;
    }

    Ok(warp::reply::with_header(
        redirect_home(),
        "set-cookie",
        session::expired_cookie(),
    ))
}

// GET / -> index page
fn index_page(
    state: AppState,
) -> impl warp::Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path::end()
        .and(warp::get())
        .and(session_id())
        .and(with_state(state))
        .and_then(index)
}

// GET /login -> login form, POST /login -> start a session
fn login_routes(
    state: AppState,
) -> impl warp::Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let form = warp::get().map(|| warp::reply::html(views::login()));

    let submit = warp::post()
        .and(session_id())
        .and(warp::body::content_length_limit(FORM_LIMIT))
        .and(warp::body::form())
        .and(with_state(state))
        .and_then(login);

    warp::path!("login").and(form.or(submit))
}

// GET /logout -> end the session
fn logout_route(
    state: AppState,
) -> impl warp::Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("logout")
        .and(warp::get())
        .and(session_id())
        .and(with_state(state))
        .and_then(logout)
}

// GET /socket -> websocket upgrade
fn ws_upgrade(
    state: AppState,
) -> impl warp::Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("socket")
        // The `ws()` filter will prepare Websocket handshake...
        .and(warp::ws())
        .and(with_state(state))
        .map(|ws: warp::ws::Ws, state: AppState| {
            // This will call our function if the handshake succeeds.
            ws.on_upgrade(move |socket| user_connected(socket, state.room))
        })
}

pub fn build_filters(
    state: AppState,
) -> impl warp::Filter<Extract = impl warp::Reply, Error = Infallible> + Clone {
    index_page(state.clone())
        .or(login_routes(state.clone()))
        .or(logout_route(state.clone()))
        .or(ws_upgrade(state))
        .with(warp::log("babblr::http"))
        .recover(handle_rejection)
}
