//! Login/Logoff helpers (spec.md §4.7). These are ordinary users of
//! [`Client::publish`]: no privileged access to the client's internals.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::client::Client;
use crate::error::AmiError;
use crate::message::Message;

/// Authenticates against the AMI server. With `md5` set, performs the
/// challenge/response exchange (`Action: Challenge` then a keyed `Login`);
/// otherwise sends the username and secret in plain text. Returns `true` iff
/// the final response's `Response` field equals `Success`, case-insensitively.
pub async fn login<S>(client: &Client<S>, user: &str, secret: &str, md5: bool) -> Result<bool, AmiError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let response = if md5 {
        let challenge_resp = client
            .publish(Message::action("Challenge").with("AuthType", "MD5"))
            .await?;

        if !is_success(&challenge_resp) {
            return Ok(false);
        }

        let challenge = challenge_resp.get("Challenge").unwrap_or_default();
        let digest = md5::compute(format!("{challenge}{secret}").as_bytes());
        let key = hex::encode(digest.0);

        client
            .publish(
                Message::action("Login")
                    .with("AuthType", "MD5")
                    .with("Username", user)
                    .with("Key", key),
            )
            .await?
    } else {
        client
            .publish(Message::action("Login").with("Username", user).with("Secret", secret))
            .await?
    };

    Ok(is_success(&response))
}

/// Logs off the current session. Returns `true` iff the response's
/// `Response` field equals `Goodbye`, case-insensitively.
pub async fn logoff<S>(client: &Client<S>) -> Result<bool, AmiError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let response = client.publish(Message::action("Logoff")).await?;
    Ok(response
        .get("Response")
        .map(|r| r.eq_ignore_ascii_case("goodbye"))
        .unwrap_or(false))
}

fn is_success(msg: &Message) -> bool {
    msg.get("Response").map(|r| r.eq_ignore_ascii_case("success")).unwrap_or(false)
}
