//! HTML for the landing page and both upload forms.

/// What the landing page shows beneath the forms.
#[derive(Debug, Default)]
pub struct PageContext<'a> {
    pub error: Option<&'a str>,
    /// URL of an annotated result image.
    pub image_path: Option<&'a str>,
}

pub fn render_index(ctx: &PageContext<'_>) -> String {
    let mut notices = String::new();
    if let Some(error) = ctx.error {
        notices.push_str(&format!(
            "    <p class=\"error\" role=\"alert\">{}</p>\n",
            escape_html(error)
        ));
    }
    if let Some(path) = ctx.image_path {
        let path = escape_html(path);
        notices.push_str(&format!(
            "    <section class=\"result\">\n      <h2>Detection result</h2>\n      <img src=\"{path}\" alt=\"Annotated image\" data-image-path=\"{path}\">\n    </section>\n"
        ));
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <title>Object Detection</title>
    <style>
      body {{ font-family: sans-serif; max-width: 48rem; margin: 2rem auto; }}
      form {{ margin-bottom: 1.5rem; }}
      .error {{ color: #b00020; }}
      img {{ max-width: 100%; }}
    </style>
  </head>
  <body>
    <h1>Object Detection</h1>
{notices}    <form action="/imgpred" method="post" enctype="multipart/form-data">
      <label>Image <input type="file" name="image" accept="image/*"></label>
      <button type="submit">Detect objects</button>
    </form>
    <form action="/vidpred" method="post" enctype="multipart/form-data">
      <label>Video <input type="file" name="file" accept="video/*"></label>
      <button type="submit">Stream detections</button>
    </form>
    <p><a href="/live_feed">Live camera feed</a></p>
  </body>
</html>
"#
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
