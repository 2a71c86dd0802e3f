//! Cookie decoding/encoding and the shared outbound cookie set.

mod codec;
mod store;

pub use codec::{
    Cookie, build_cookie_header, extract_session_id, find_session_cookie,
    parse_set_cookie_headers,
};
pub use store::{CookieStore, CookieStrategy, HeaderCookieStore, JarCookieStore, cookie_store_for};
