//! Static HTML/JS status dashboard.
//!
//! Deliberately thin: this page only fetches [`crate::engine::Snapshot`]
//! from `/api/status_data` and renders it client-side. All the interesting
//! logic lives in the Snapshot Reporter, not here.

/// The `GET /status` page body.
pub const PAGE: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>keyforge status</title>
<style>
  body { font-family: system-ui, sans-serif; margin: 2rem; color: #1a1a1a; }
  table { border-collapse: collapse; width: 100%; margin-top: 1rem; }
  th, td { border: 1px solid #ccc; padding: 0.35rem 0.6rem; text-align: right; }
  th:first-child, td:first-child { text-align: left; }
  tr.exceeded { background: #fbe4e4; }
  tr.rate-limited { background: #fff6d6; }
  .totals { font-size: 1.1rem; margin-top: 0.5rem; }
  .pill { display: inline-block; padding: 0.1rem 0.5rem; border-radius: 0.8rem; font-size: 0.8rem; }
  .pill.ok { background: #dcf5dc; }
  .pill.warn { background: #fff0b3; }
  .pill.bad { background: #f5c2c2; }
</style>
</head>
<body>
<h1>keyforge</h1>
<div id="summary" class="totals">loading…</div>
<table id="cells">
  <thead>
    <tr><th>model</th><th>key</th><th>last 60s</th><th>today</th><th>lifetime</th><th>status</th></tr>
  </thead>
  <tbody></tbody>
</table>

<script>
async function refresh() {
  const res = await fetch("/api/status_data");
  const snap = await res.json();

  const summary = document.getElementById("summary");
  summary.textContent =
    `lifetime: ${snap.total_tokens_lifetime} tokens · today: ${snap.total_tokens_today} tokens` +
    (snap.preferred_key_default_model ? ` · preferred key: ${snap.preferred_key_default_model}` : "");

  const tbody = document.querySelector("#cells tbody");
  tbody.innerHTML = "";
  for (const cell of snap.cells) {
    const tr = document.createElement("tr");
    let pill = '<span class="pill ok">available</span>';
    if (cell.exceeded) {
      tr.className = "exceeded";
      pill = '<span class="pill bad">exceeded</span>';
    } else if (cell.probably_exceeded) {
      tr.className = "rate-limited";
      pill = '<span class="pill warn">rate limited</span>';
    }
    tr.innerHTML =
      `<td>${cell.model}</td><td>${cell.key}</td><td>${cell.tokens_last_minute}</td>` +
      `<td>${cell.today_tokens}</td><td>${cell.total_tokens}</td><td>${pill}</td>`;
    tbody.appendChild(tr);
  }
}

refresh();
setInterval(refresh, 5000);
</script>
</body>
</html>
"#;
