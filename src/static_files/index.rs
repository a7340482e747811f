use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use minijinja::{context, Environment};
use serde::Serialize;

const TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Index of {{ path }}</title></head>
<body>
<h1>Index of {{ path }}</h1>
<table>
<tr><th>Name</th><th>Size</th><th>Modified</th></tr>
{%- if parent %}
<tr><td><a href="{{ parent }}">../</a></td><td>-</td><td>-</td></tr>
{%- endif %}
{%- for e in entries %}
<tr><td><a href="{{ e.href }}">{{ e.name }}{% if e.dir %}/{% endif %}</a></td><td>{% if e.dir %}-{% else %}{{ e.size }}{% endif %}</td><td>{{ e.modified }}</td></tr>
{%- endfor %}
</table>
</body>
</html>
"#;

#[derive(Debug, Serialize)]
struct Entry {
    name: String,
    href: String,
    dir: bool,
    size: u64,
    modified: String,
}

/// HTML listing of `dir`, linked relative to `url_path` (which ends in `/`).
///
/// Hidden entries (leading `.`) are skipped; directories sort first.
pub(crate) fn render(dir: &Path, url_path: &str) -> io::Result<String> {
    let mut entries = Vec::new();
    for item in fs::read_dir(dir)? {
        let item = item?;
        let name = item.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let meta = item.metadata()?;
        let is_dir = meta.is_dir();
        let encoded = urlencoding::encode(&name);
        entries.push(Entry {
            href: if is_dir {
                format!("{url_path}{encoded}/")
            } else {
                format!("{url_path}{encoded}")
            },
            name,
            dir: is_dir,
            size: meta.len(),
            modified: meta
                .modified()
                .map(httpdate::fmt_http_date)
                .unwrap_or_else(|_| httpdate::fmt_http_date(SystemTime::UNIX_EPOCH)),
        });
    }
    entries.sort_by(|a, b| b.dir.cmp(&a.dir).then_with(|| a.name.cmp(&b.name)));

    let parent = url_path
        .trim_end_matches('/')
        .rsplit_once('/')
        .map(|(p, _)| format!("{p}/"));

    let mut env = Environment::new();
    env.add_template("index.html", TEMPLATE)
        .map_err(io::Error::other)?;
    let tmpl = env.get_template("index.html").map_err(io::Error::other)?;
    tmpl.render(context! { path => url_path, parent => parent, entries => entries })
        .map_err(io::Error::other)
}
