//! Minimal holding pages. Each embeds the puzzle id, a cache-busting nonce and a form that
//! posts back to `?<param>=<puzzle id>`.

use super::ChallengeKind;

pub(crate) struct PageParams<'a> {
    pub path: &'a str,
    pub puzzle: &'a str,
    pub nonce: &'a str,
    pub expires_at: u64,
}

fn action(kind: ChallengeKind, p: &PageParams<'_>) -> String {
    format!("{}?{}={}&amp;_={}", escape(p.path), kind.submit_param(), p.puzzle, p.nonce)
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

pub(crate) fn automated(content: &str, p: &PageParams<'_>) -> String {
    format!(
        r#"<!DOCTYPE html>
<html><head><meta charset="utf-8"><meta name="robots" content="noindex">
<title>Just a moment...</title></head>
<body data-expires="{expires}">
{content}
<noscript><p>Please enable JavaScript to continue.</p></noscript>
<form id="umb" method="POST" action="{action}">
<input type="hidden" name="sk" value="{puzzle}">
<input type="hidden" name="jschallenge" value="">
</form>
<script>
(function(){{var f=document.getElementById("umb"),s=f.sk.value,d=[],n=0n,i,c;
for(i=0;i<s.length;i++){{c=s.charAt(i);if(c>="0"&&c<="9")d.push(BigInt(c));else n++;}}
var u=function(x){{return x===0n?1n:x;}},a=d.length?d.reduce(function(x,y){{return u(x)*u(y);}}):0n;
f.jschallenge.value=(a*n).toString();setTimeout(function(){{f.submit();}},1500);}})();
</script>
</body></html>"#,
        expires = p.expires_at,
        content = content,
        action = action(ChallengeKind::Automated, p),
        puzzle = p.puzzle,
    )
}

pub(crate) fn captcha(site_key: &str, header: &str, description: &str, p: &PageParams<'_>) -> String {
    format!(
        r#"<!DOCTYPE html>
<html><head><meta charset="utf-8"><meta name="robots" content="noindex">
<title>{header}</title>
<script src="https://www.google.com/recaptcha/api.js?_={nonce}" async defer></script></head>
<body data-expires="{expires}">
<h1>{header}</h1>
<p>{description}</p>
<form method="POST" action="{action}">
<div class="g-recaptcha" data-sitekey="{site_key}"></div>
<button type="submit">Continue</button>
</form>
</body></html>"#,
        header = header,
        description = description,
        nonce = p.nonce,
        expires = p.expires_at,
        action = action(ChallengeKind::Captcha, p),
        site_key = site_key,
    )
}
