//! Server-rendered pages.

pub const TITLE: &str = "Babblr";

static CHAT_SCRIPT: &str = r#"<script type="text/javascript">
        const log = document.getElementById('messages');
        const text = document.getElementById('text');
        const scheme = location.protocol === 'https:' ? 'wss://' : 'ws://';
        const ws = new WebSocket(scheme + location.host + '/socket');
        function show(data) {
            const line = document.createElement('li');
            line.innerText = data;
            log.appendChild(line);
        }
        ws.onmessage = function(frame) {
            const event = JSON.parse(frame.data);
            if (event.event === 'message') {
                show(event.data);
            }
        };
        ws.onclose = function() {
            show('Disconnected!');
        };
        document.getElementById('chat').onsubmit = function(e) {
            e.preventDefault();
            if (text.value) {
                ws.send(JSON.stringify({ event: 'send', data: { message: text.value } }));
                text.value = '';
            }
        };
        </script>"#;

fn layout(body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
    <head>
        <meta charset="utf-8">
        <title>{title}</title>
    </head>
    <body>
        <h1>{title}</h1>
        {body}
    </body>
</html>
"#,
        title = TITLE,
        body = body
    )
}

pub fn index(username: Option<&str>) -> String {
    match username {
        Some(name) => layout(&format!(
            r#"<p>Logged in as <strong>{name}</strong> (<a href="/logout">Log out</a>)</p>
        <ul id="messages"></ul>
        <form id="chat">
            <input type="text" id="text" autocomplete="off" />
            <button type="submit">Send</button>
        </form>
        {script}"#,
            name = escape(name),
            script = CHAT_SCRIPT
        )),
        None => layout(r#"<p><a href="/login">Log in</a> to start chatting.</p>"#),
    }
}

pub fn login() -> String {
    layout(
        r#"<p>Please enter a handle</p>
        <form method="post" action="/login">
            <input type="text" name="username" autofocus />
            <button type="submit">Log in</button>
        </form>"#,
    )
}

pub fn not_found() -> String {
    layout(r#"<p>Nothing here. <a href="/">Back</a></p>"#)
}

pub fn bad_request() -> String {
    layout(r#"<p>Bad request. <a href="/">Back</a></p>"#)
}

pub fn server_error() -> String {
    layout("<p>Something went wrong, try again later.</p>")
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}
