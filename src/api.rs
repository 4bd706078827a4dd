// API client module: a small blocking HTTP client that talks to the Matrix
// homeserver's media, room-state and Synapse admin endpoints. The protocol
// logic consumes it through the `StickerGateway` trait so tests can swap in
// an in-memory fake.

use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::pack::PACK_EVENT_TYPE;

/// Downloaded media bytes plus the response headers the exporter uses.
#[derive(Debug, Clone)]
pub struct MediaDownload {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

/// Capability surface of the remote server.
///
/// Every method is a single authenticated HTTP call. Failures collapse into
/// [`Error::Remote`] carrying the server's status and raw body; the only
/// statuses given their own meaning are not-found on the state read (absent
/// pack) and forbidden on the admin check (caller is not an admin).
pub trait StickerGateway {
    /// Server-wide media upload limit in bytes (`m.upload.size`).
    fn max_upload_size(&self) -> Result<u64>;

    /// User id the access token belongs to.
    fn whoami(&self) -> Result<String>;

    /// Whether `user_id` is a server admin. Forbidden means "no".
    fn is_server_admin(&self, user_id: &str) -> Result<bool>;

    /// Upload media, returning the opaque content reference.
    fn upload_media(&self, bytes: Vec<u8>, content_type: &str, filename: &str) -> Result<String>;

    /// Download media by its parsed content reference.
    fn download_media(&self, authority: &str, media_id: &str) -> Result<MediaDownload>;

    /// Read the pack state value for `(room, pack_name)`; `None` if absent.
    fn get_pack_state(&self, room_id: &str, pack_name: &str) -> Result<Option<Value>>;

    /// Full-replace write of the pack state value for `(room, pack_name)`.
    fn put_pack_state(&self, room_id: &str, pack_name: &str, state: &Value) -> Result<()>;

    /// Shield media from the server's retention sweep (admin only).
    fn protect_media(&self, media_id: &str) -> Result<()>;

    /// Remove the retention shield from media (admin only).
    fn unprotect_media(&self, media_id: &str) -> Result<()>;
}

/// Blocking gateway against a live homeserver. Holds the reqwest client, the
/// server's base URL and the bearer token attached to every call.
pub struct MatrixApi {
    client: Client,
    base_url: String,
    token: String,
}

impl MatrixApi {
    /// Build a gateway for the configured homeserver.
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder().build().map_err(remote_error)?;
        Ok(Self {
            client,
            base_url: format!("https://{}", config.matrix_domain),
            token: config.matrix_token.clone(),
        })
    }

    fn state_url(&self, room_id: &str, pack_name: &str) -> String {
        format!(
            "{}/_matrix/client/v3/rooms/{}/state/{}/{}",
            self.base_url,
            encode_path_segment(room_id),
            PACK_EVENT_TYPE,
            encode_path_segment(pack_name),
        )
    }

    fn media_admin_post(&self, action: &str, media_id: &str) -> Result<()> {
        let url = format!(
            "{}/_synapse/admin/v1/media/{}/{}",
            self.base_url,
            action,
            encode_path_segment(media_id),
        );
        let res = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({}))
            .send()
            .map_err(remote_error)?;
        check(res)?;
        Ok(())
    }
}

impl StickerGateway for MatrixApi {
    fn max_upload_size(&self) -> Result<u64> {
        let url = format!("{}/_matrix/media/v3/config", self.base_url);
        let res = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .map_err(remote_error)?;
        let value: Value = check(res)?.json().map_err(remote_error)?;
        value
            .get("m.upload.size")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::Remote("media config is missing m.upload.size".to_string()))
    }

    fn whoami(&self) -> Result<String> {
        let url = format!("{}/_matrix/client/v3/account/whoami", self.base_url);
        let res = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .map_err(remote_error)?;
        let value: Value = check(res)?.json().map_err(remote_error)?;
        value
            .get("user_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Remote("whoami response is missing user_id".to_string()))
    }

    fn is_server_admin(&self, user_id: &str) -> Result<bool> {
        let url = format!(
            "{}/_synapse/admin/v1/users/{}/admin",
            self.base_url,
            encode_path_segment(user_id),
        );
        let res = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .map_err(remote_error)?;
        if res.status() == StatusCode::FORBIDDEN {
            return Ok(false);
        }
        let value: Value = check(res)?.json().map_err(remote_error)?;
        Ok(value.get("admin").and_then(Value::as_bool).unwrap_or(false))
    }

    fn upload_media(&self, bytes: Vec<u8>, content_type: &str, filename: &str) -> Result<String> {
        let url = format!("{}/_matrix/media/v3/upload", self.base_url);
        let res = self
            .client
            .post(url)
            .query(&[("filename", filename)])
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .map_err(remote_error)?;
        let value: Value = check(res)?.json().map_err(remote_error)?;
        value
            .get("content_uri")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Remote("upload response is missing content_uri".to_string()))
    }

    fn download_media(&self, authority: &str, media_id: &str) -> Result<MediaDownload> {
        let url = format!(
            "{}/_matrix/media/v3/download/{}/{}",
            self.base_url,
            encode_path_segment(authority),
            encode_path_segment(media_id),
        );
        let res = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .map_err(remote_error)?;
        let res = check(res)?;

        let header = |name| {
            res.headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header(CONTENT_TYPE);
        let content_disposition = header(CONTENT_DISPOSITION);
        let bytes = res.bytes().map_err(remote_error)?.to_vec();

        Ok(MediaDownload {
            bytes,
            content_type,
            content_disposition,
        })
    }

    fn get_pack_state(&self, room_id: &str, pack_name: &str) -> Result<Option<Value>> {
        let res = self
            .client
            .get(self.state_url(room_id, pack_name))
            .bearer_auth(&self.token)
            .send()
            .map_err(remote_error)?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let value: Value = check(res)?.json().map_err(remote_error)?;
        Ok(Some(value))
    }

    fn put_pack_state(&self, room_id: &str, pack_name: &str, state: &Value) -> Result<()> {
        let res = self
            .client
            .put(self.state_url(room_id, pack_name))
            .bearer_auth(&self.token)
            .json(state)
            .send()
            .map_err(remote_error)?;
        check(res)?;
        Ok(())
    }

    fn protect_media(&self, media_id: &str) -> Result<()> {
        self.media_admin_post("protect", media_id)
    }

    fn unprotect_media(&self, media_id: &str) -> Result<()> {
        self.media_admin_post("unprotect", media_id)
    }
}

fn remote_error(err: reqwest::Error) -> Error {
    Error::Remote(err.to_string())
}

/// Bail with the server's status and raw body on any non-success response.
fn check(res: Response) -> Result<Response> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status();
    let body = res.text().unwrap_or_else(|_| String::new());
    Err(Error::Remote(format!("{status} - {body}")))
}

/// Percent-encode a URL path segment. Room ids, pack names and user ids all
/// contain characters that are not path-safe; everything outside the RFC 3986
/// unreserved set is encoded.
pub(crate) fn encode_path_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Decode percent escapes. Truncated or non-hex escapes stay literal; the
/// result is read as UTF-8 with replacement. Used to recover original
/// filenames from `filename*` content-disposition fields on export.
pub(crate) fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = (bytes[i + 1] as char).to_digit(16);
            let lo = (bytes[i + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
