// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `GET /` and `GET /chat`. No templating crate is in the dependency stack
//! — these are small enough that pulling one in would cost more than it
//! saves, so the markup is a plain static string with a tiny inline script
//! driving `/api/send` and `/api/events`.

use axum::response::Html;

const INDEX: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>gateway</title>
</head>
<body>
  <h1>gateway</h1>
  <p>Authenticated. <a href="/chat">Open chat</a>.</p>
</body>
</html>
"#;

const CHAT: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>gateway chat</title>
  <style>
    body { font-family: system-ui, sans-serif; max-width: 48rem; margin: 2rem auto; }
    #log { white-space: pre-wrap; border: 1px solid #ccc; padding: 1rem; min-height: 20rem; }
    #composer { display: flex; gap: 0.5rem; margin-top: 1rem; }
    #message { flex: 1; }
  </style>
</head>
<body>
  <h1>gateway chat</h1>
  <div id="log"></div>
  <form id="composer">
    <input id="message" autocomplete="off" placeholder="message">
    <button type="submit">send</button>
  </form>
  <script>
    const log = document.getElementById('log');
    function append(text) {
      log.textContent += text;
      log.scrollTop = log.scrollHeight;
    }

    const source = new EventSource('/api/events');
    source.onmessage = (ev) => {
      const event = JSON.parse(ev.data);
      if (event.type === 'text_delta') append(event.delta);
      if (event.type === 'agent_end' && !event.suppressed) append('\n\n');
    };

    document.getElementById('composer').addEventListener('submit', async (e) => {
      e.preventDefault();
      const input = document.getElementById('message');
      const message = input.value;
      if (!message) return;
      input.value = '';
      append('\n> ' + message + '\n');
      await fetch('/api/send', {
        method: 'POST',
        headers: { 'Content-Type': 'application/json' },
        body: JSON.stringify({ message }),
      });
    });
  </script>
</body>
</html>
"#;

pub async fn index() -> Html<&'static str> {
    Html(INDEX)
}

pub async fn chat() -> Html<&'static str> {
    Html(CHAT)
}
