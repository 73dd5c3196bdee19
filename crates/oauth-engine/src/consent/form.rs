//! HTML pages for the consent flow.

/// Values carried through the consent form verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantForm {
    pub then: String,
    pub csrf: String,
    pub client_id: String,
    pub user_name: String,
    pub scopes: String,
    pub redirect_uri: String,
}

const STYLE: &str = r#"<style>
body { font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif; background: #f5f5f5; margin: 0; display: flex; justify-content: center; align-items: center; min-height: 100vh; }
.card { background: #fff; border-radius: 8px; box-shadow: 0 2px 8px rgba(0,0,0,0.1); padding: 32px; max-width: 440px; width: 100%; }
h1 { font-size: 20px; margin: 0 0 8px; color: #333; }
.subtitle { color: #666; font-size: 14px; margin: 0 0 24px; }
ul { padding-left: 20px; color: #333; font-size: 14px; }
.actions { display: flex; gap: 8px; margin-top: 16px; }
button { flex: 1; padding: 10px; border: none; border-radius: 4px; font-size: 14px; font-weight: 500; cursor: pointer; }
button[name="approve"] { background: #4a90d9; color: #fff; }
button[name="deny"] { background: #eee; color: #333; }
</style>"#;

/// Render the approve/deny page for `form`.
///
/// All values are HTML-escaped.
pub fn render_grant_page(action: &str, form: &GrantForm) -> String {
    let scope_items: String = crate::scope::split(&form.scopes)
        .iter()
        .map(|scope| format!("<li>{}</li>\n", html_escape(scope)))
        .collect();
    let scope_list = if scope_items.is_empty() {
        "<p class=\"subtitle\">No scopes were requested.</p>".to_string()
    } else {
        format!("<ul>\n{scope_items}</ul>")
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
<title>Authorize Access</title>
{STYLE}
</head>
<body>
<div class="card">
<h1>Authorize Access</h1>
<p class="subtitle"><strong>{client_id}</strong> is requesting access to your account as <strong>{user_name}</strong></p>
{scope_list}
<form method="POST" action="{action}">
<input type="hidden" name="then" value="{then}">
<input type="hidden" name="csrf" value="{csrf}">
<input type="hidden" name="client_id" value="{client_id}">
<input type="hidden" name="user_name" value="{user_name}">
<input type="hidden" name="scopes" value="{scopes}">
<input type="hidden" name="redirect_uri" value="{redirect_uri}">
<div class="actions">
<button type="submit" name="approve" value="true">Allow</button>
<button type="submit" name="deny" value="true">Deny</button>
</div>
</form>
</div>
</body>
</html>"#,
        action = html_escape(action),
        then = html_escape(&form.then),
        csrf = html_escape(&form.csrf),
        client_id = html_escape(&form.client_id),
        user_name = html_escape(&form.user_name),
        scopes = html_escape(&form.scopes),
        redirect_uri = html_escape(&form.redirect_uri),
    )
}

/// Render a terminal page with a heading and one message.
pub fn render_message_page(title: &str, message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
{STYLE}
</head>
<body>
<div class="card">
<h1>{title}</h1>
<p class="subtitle">{message}</p>
</div>
</body>
</html>"#,
        title = html_escape(title),
        message = html_escape(message),
    )
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(
            html_escape(r#"<script>alert("xss")</script>"#),
            "&lt;script&gt;alert(&quot;xss&quot;)&lt;/script&gt;"
        );
    }

    #[test]
    fn test_grant_page_carries_fields_escaped() {
        let form = GrantForm {
            then: "/oauth/authorize?client_id=acme&state=x".into(),
            csrf: "token123".into(),
            client_id: "acme".into(),
            user_name: "alice".into(),
            scopes: "read write".into(),
            redirect_uri: "https://acme.example/cb".into(),
        };
        let html = render_grant_page("/oauth/grant", &form);
        assert!(html.contains(r#"name="then" value="/oauth/authorize?client_id=acme&amp;state=x""#));
        assert!(html.contains(r#"name="csrf" value="token123""#));
        assert!(html.contains("<li>read</li>"));
        assert!(html.contains("<li>write</li>"));
        assert!(html.contains(r#"action="/oauth/grant""#));
    }

    #[test]
    fn test_grant_page_without_scopes() {
        let html = render_grant_page("/grant", &GrantForm::default());
        assert!(html.contains("No scopes were requested."));
    }

    #[test]
    fn test_message_page_escapes() {
        let html = render_message_page("Error", "<b>bad</b>");
        assert!(html.contains("&lt;b&gt;bad&lt;/b&gt;"));
    }
}
