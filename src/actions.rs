//! One-shot server interaction helpers.
//!
//! Simple request/response calls built atop [`Session::send_command`],
//! outside the event stream. These hold no state of their own; callers
//! check the returned [`Status`] for remote-side rejections (e.g.
//! insufficient permissions).

use anyhow::{Context, Result};

use crate::codec::{self, Response, Status, Value};
use crate::session::Session;
use crate::transport::Transport;

/// Move a client to the given channel.
pub async fn move_client<T: Transport>(
    session: &mut Session<T>,
    clid: i64,
    cid: i64,
) -> Result<Status> {
    log::info!("Moving client {clid} to channel {cid}");
    let command = codec::format_command(
        "clientmove",
        &[("cid", Value::Int(cid)), ("clid", Value::Int(clid))],
    );
    let lines = session.send_command(&command, 1).await?;
    status_from(&lines)
}

/// Send a chat message. `text` is plain; escaping happens here.
pub async fn send_text_message<T: Transport>(
    session: &mut Session<T>,
    targetmode: i64,
    target: i64,
    text: &str,
) -> Result<Status> {
    let command = codec::format_command(
        "sendtextmessage",
        &[
            ("targetmode", Value::Int(targetmode)),
            ("target", Value::Int(target)),
            ("msg", Value::Text(codec::escape_text(text))),
        ],
    );
    let lines = session.send_command(&command, 1).await?;
    status_from(&lines)
}

/// List the clients currently on the server.
pub async fn client_list<T: Transport>(session: &mut Session<T>) -> Result<Response> {
    log::debug!("Querying for current clients");
    let lines = session.send_command("clientlist -uid -groups", 2).await?;
    response_from(&lines)
}

/// Identify this session (`whoami`).
pub async fn who_am_i<T: Transport>(session: &mut Session<T>) -> Result<Response> {
    let lines = session.send_command("whoami", 2).await?;
    response_from(&lines)
}

/// The trailing status of a response; for error-only responses this is
/// the only line.
fn status_from(lines: &[String]) -> Result<Status> {
    let last = lines.last().context("empty response")?;
    Ok(codec::parse_error(last)?)
}

/// Assemble a [`Response`] from raw response lines. A single line is an
/// error-only response with no data rows.
fn response_from(lines: &[String]) -> Result<Response> {
    let (status_line, data) = lines.split_last().context("empty response")?;
    let status = codec::parse_error(status_line)?;
    let rows = data.iter().flat_map(|line| codec::parse_rows(line)).collect();
    Ok(Response { rows, status })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use crate::transport::testing::{ScriptItem, ScriptedTransport};
    use std::sync::{Arc, Mutex};

    async fn session_for(
        script: Vec<ScriptItem>,
    ) -> (
        Session<ScriptedTransport>,
        Arc<Mutex<Vec<String>>>,
    ) {
        let mut script_with_auth = vec![ScriptItem::Line("error id=0 msg=ok")];
        script_with_auth.extend(script);
        let transport = ScriptedTransport::new(script_with_auth);
        let written = transport.written();
        let config = SessionConfig {
            apikey: "secret".to_string(),
            ..SessionConfig::default()
        };
        let session = Session::authenticate(transport, &config).await.unwrap();
        (session, written)
    }

    #[tokio::test]
    async fn test_move_client_success() {
        let (mut session, written) =
            session_for(vec![ScriptItem::Line("error id=0 msg=ok")]).await;

        let status = move_client(&mut session, 17, 4).await.unwrap();
        assert!(status.ok());
        assert!(written
            .lock()
            .unwrap()
            .contains(&"clientmove cid=4 clid=17".to_string()));
    }

    #[tokio::test]
    async fn test_move_client_permission_rejection_is_visible() {
        let (mut session, _written) = session_for(vec![ScriptItem::Line(
            "error id=2568 msg=insufficient\\sclient\\spermissions",
        )])
        .await;

        let status = move_client(&mut session, 17, 4).await.unwrap();
        assert!(!status.ok());
        assert_eq!(status.id, 2568);
    }

    #[tokio::test]
    async fn test_send_text_message_escapes_payload() {
        let (mut session, written) =
            session_for(vec![ScriptItem::Line("error id=0 msg=ok")]).await;

        send_text_message(&mut session, 1, 5, "Command not found.")
            .await
            .unwrap();
        assert!(written.lock().unwrap().contains(
            &"sendtextmessage targetmode=1 target=5 msg=Command\\snot\\sfound.".to_string()
        ));
    }

    #[tokio::test]
    async fn test_client_list_parses_rows() {
        let (mut session, _written) = session_for(vec![
            ScriptItem::Line("clid=1 client_nickname=alice|clid=2 client_nickname=bob"),
            ScriptItem::Line("error id=0 msg=ok"),
        ])
        .await;

        let response = client_list(&mut session).await.unwrap();
        assert!(response.status.ok());
        assert_eq!(response.rows.len(), 2);
        assert_eq!(response.rows[0].get_text("client_nickname"), Some("alice"));
        assert_eq!(response.rows[1].get_int("clid"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_only_response_has_no_rows() {
        // Failed commands answer with just the error line.
        let (mut session, _written) = session_for(vec![ScriptItem::Line(
            "error id=1024 msg=invalid\\sserverID",
        )])
        .await;

        let response = who_am_i(&mut session).await.unwrap();
        assert_eq!(response.status.id, 1024);
        assert!(response.rows.is_empty());
    }
}
