//! Local HTTP dashboard: pick a gene and a condition, get the isoform block
//! model back as inline SVG. Tables are loaded once and shared read-only.

use std::fmt::Write as _;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::analysis::isoform_join::{build_gene_view, GeneView};
use crate::analysis::isoform_plot::isoform_svg;
use crate::data_handling::reference_tables::ReferenceTables;
use crate::models::{Condition, GeneRecord};

const NO_SEGMENTS_MESSAGE: &str = "No exon/CDS segments found for this gene.";

pub struct DashboardState {
    pub tables: ReferenceTables,
}

#[derive(Debug, Serialize)]
struct ConditionOption {
    key: String,
    label: String,
    genotype: String,
    timepoint: String,
}

impl From<&Condition> for ConditionOption {
    fn from(c: &Condition) -> Self {
        ConditionOption {
            key: c.to_string(),
            label: c.label(),
            genotype: c.genotype.clone(),
            timepoint: c.timepoint.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    gene: Option<String>,
    condition: Option<String>,
}

type ViewResult = Result<GeneView, (StatusCode, String)>;

fn gene_view_for(state: &DashboardState, agi: &str, condition: &str) -> ViewResult {
    if state.tables.gene(agi).is_none() {
        return Err((StatusCode::NOT_FOUND, format!("unknown gene: {agi}")));
    }
    let condition: Condition = condition
        .parse()
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("{e}")))?;

    let segments = state.tables.segments_for_gene(agi);
    if segments.is_empty() {
        return Err((StatusCode::NOT_FOUND, NO_SEGMENTS_MESSAGE.to_string()));
    }
    Ok(build_gene_view(agi, segments, state.tables.expression(), &condition))
}

// ── handlers ─────────────────────────────────────────────────────────────────

async fn get_genes(State(state): State<Arc<DashboardState>>) -> Json<Vec<GeneRecord>> {
    Json(state.tables.genes().cloned().collect())
}

async fn get_conditions(State(state): State<Arc<DashboardState>>) -> Json<Vec<ConditionOption>> {
    Json(state.tables.conditions().iter().map(ConditionOption::from).collect())
}

async fn get_isoforms(
    Path((agi, condition)): Path<(String, String)>,
    State(state): State<Arc<DashboardState>>,
) -> impl IntoResponse {
    gene_view_for(&state, &agi, &condition).map(|view| (StatusCode::OK, Json(view.isoforms)))
}

async fn get_plot(
    Path((agi, condition)): Path<(String, String)>,
    State(state): State<Arc<DashboardState>>,
) -> Response {
    let view = match gene_view_for(&state, &agi, &condition) {
        Ok(view) => view,
        Err(err) => return err.into_response(),
    };
    match isoform_svg(&view) {
        Ok(svg) => (StatusCode::OK, [(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response(),
        Err(err) => {
            error!("Rendering {agi} / {condition} failed: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Internal error: {err}")).into_response()
        }
    }
}

async fn get_index(
    Query(query): Query<PageQuery>,
    State(state): State<Arc<DashboardState>>,
) -> (StatusCode, Html<String>) {
    render_page(&state, &query)
}

// ── page ─────────────────────────────────────────────────────────────────────

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn selected(is: bool) -> &'static str {
    if is {
        " selected"
    } else {
        ""
    }
}

fn render_page(state: &DashboardState, query: &PageQuery) -> (StatusCode, Html<String>) {
    let tables = &state.tables;
    let gene = query.gene.as_deref().filter(|g| !g.is_empty());
    let condition = query
        .condition
        .clone()
        .filter(|c| !c.is_empty())
        .or_else(|| tables.default_condition().map(ToString::to_string))
        .unwrap_or_default();

    let mut status = StatusCode::OK;
    let mut html = String::new();
    html.push_str(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">\
         <title>Isoform expression dashboard</title></head>\n<body style=\"font-family: sans-serif; margin: 2em;\">\n\
         <h1>Isoform expression dashboard</h1>\n\
         <p>Isoform structures of a gene, colored by log1p(mean TPM) in the selected condition.</p>\n\
         <form method=\"get\" action=\"/\">\n",
    );

    html.push_str("<label>Gene <select name=\"gene\">\n<option value=\"\">(choose a gene)</option>\n");
    for g in tables.genes() {
        let _ = writeln!(
            html,
            "<option value=\"{}\"{}>{} – {}</option>",
            escape_html(&g.agi),
            selected(gene == Some(g.agi.as_str())),
            escape_html(&g.agi),
            escape_html(&g.name)
        );
    }
    html.push_str("</select></label>\n<label>Condition <select name=\"condition\">\n");
    for c in tables.conditions() {
        let key = c.to_string();
        let _ = writeln!(
            html,
            "<option value=\"{}\"{}>{}</option>",
            escape_html(&key),
            selected(key == condition),
            escape_html(&c.label())
        );
    }
    html.push_str("</select></label>\n<button type=\"submit\">Show</button>\n</form>\n<hr>\n");

    match gene {
        None => html.push_str("<p>Please select a gene above.</p>\n"),
        Some(agi) => match gene_view_for(state, agi, &condition) {
            Ok(view) => {
                if let Some(record) = tables.gene(agi) {
                    let _ = writeln!(
                        html,
                        "<h2>{} ({})</h2>",
                        escape_html(&record.agi),
                        escape_html(&record.name)
                    );
                    if let Some(description) = &record.description {
                        let _ = writeln!(html, "<p>{}</p>", escape_html(description));
                    }
                }
                let with_data = view.isoforms.iter().filter(|iso| iso.has_data()).count();
                let _ = writeln!(
                    html,
                    "<p>Condition: {} ({} of {} isoforms with expression data)</p>",
                    escape_html(&view.condition.label()),
                    with_data,
                    view.isoforms.len()
                );
                match isoform_svg(&view) {
                    Ok(svg) => html.push_str(&svg),
                    Err(err) => {
                        error!("Rendering {agi} / {condition} failed: {err}");
                        status = StatusCode::INTERNAL_SERVER_ERROR;
                        let _ = writeln!(html, "<p>Could not draw this gene: {}</p>", escape_html(&err.to_string()));
                    }
                }
            }
            Err((code, message)) => {
                status = code;
                let _ = writeln!(html, "<p>{}</p>", escape_html(&message));
            }
        },
    }

    html.push_str("</body></html>\n");
    (status, Html(html))
}

// ── server ───────────────────────────────────────────────────────────────────

pub fn router(state: Arc<DashboardState>) -> Router {
    Router::new()
        .route("/", get(get_index))
        .route("/api/genes", get(get_genes))
        .route("/api/conditions", get(get_conditions))
        .route("/api/isoforms/{agi}/{condition}", get(get_isoforms))
        .route("/plot/{agi}/{condition}", get(get_plot))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(tables: ReferenceTables, bind_address: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("Dashboard listening on http://{}", listener.local_addr()?);

    let app = router(Arc::new(DashboardState { tables }));
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_handling::reference_tables::demo_tables;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app() -> Router {
        router(Arc::new(DashboardState { tables: demo_tables() }))
    }

    async fn get_body(uri: &str) -> (StatusCode, Option<String>, String) {
        let res = app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let content_type = res
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn plot_is_svg() {
        let (status, content_type, body) = get_body("/plot/AT1G01010/7ko_LL18").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("image/svg+xml"));
        assert!(body.contains("AT1G01010.1"));
        assert!(body.contains("AT1G01010.2"));
    }

    #[tokio::test]
    async fn unknown_gene_is_404() {
        let (status, _, _) = get_body("/plot/AT9G99999/7ko_LL18").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn gene_without_segments_explains() {
        let (status, _, body) = get_body("/api/isoforms/AT1G01020/7ko_LL18").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, NO_SEGMENTS_MESSAGE);
    }

    #[tokio::test]
    async fn isoform_json_carries_colors() {
        let (status, _, body) = get_body("/api/isoforms/AT1G01010/WT_LL18").await;
        assert_eq!(status, StatusCode::OK);

        let isoforms: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(isoforms.as_array().unwrap().len(), 2);
        // only .1 has a WT value, so it sits at the midpoint
        assert_eq!(isoforms[0]["color"], "#8C96C6");
        assert_eq!(isoforms[1]["color"], "#D3D3D3");
    }

    #[tokio::test]
    async fn bad_condition_key_is_400() {
        let (status, _, _) = get_body("/api/isoforms/AT1G01010/LL18").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn lists_genes_and_conditions() {
        let (_, _, genes) = get_body("/api/genes").await;
        let genes: serde_json::Value = serde_json::from_str(&genes).unwrap();
        assert_eq!(genes[0]["agi"], "AT1G01010");
        assert_eq!(genes[1]["name"], "ARV1");

        let (_, _, conditions) = get_body("/api/conditions").await;
        let conditions: serde_json::Value = serde_json::from_str(&conditions).unwrap();
        assert_eq!(conditions[0]["key"], "7ko_LL18");
        assert_eq!(conditions[1]["label"], "WT • LL18");
    }

    #[tokio::test]
    async fn page_defaults_and_selection() {
        let (status, _, body) = get_body("/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Please select a gene above."));
        assert!(body.contains("<option value=\"7ko_LL18\" selected>"));

        let (status, _, body) = get_body("/?gene=AT1G01010&condition=WT_LL18").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<h2>AT1G01010 (NAC001)</h2>"));
        assert!(body.contains("(1 of 2 isoforms with expression data)"));
        assert!(body.contains("<svg"));

        let (_, _, body) = get_body("/?gene=AT1G01020").await;
        assert!(body.contains(NO_SEGMENTS_MESSAGE));
    }

    #[tokio::test]
    async fn cleared_condition_falls_back_to_default() {
        let (status, _, body) = get_body("/?gene=AT1G01010&condition=").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Condition: 7ko • LL18"));
        assert!(body.contains("<option value=\"7ko_LL18\" selected>"));
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
    }
}
