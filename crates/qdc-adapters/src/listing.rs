//! Broker research listing pages (`table.type_1`).

use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::AdapterError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRow {
    pub subject_name: String,
    pub title: String,
    pub publisher: String,
    pub document_url: Option<String>,
    pub listing_date: Option<NaiveDate>,
}

fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Message(e.to_string()))
}

fn cell_text(cell: &ElementRef<'_>) -> String {
    cell.text().map(str::trim).collect()
}

fn absolute_document_url(href: &str, document_host: &str) -> String {
    let href = href.trim();
    if href.starts_with("http") {
        href.to_string()
    } else {
        format!("{}{}", document_host.trim_end_matches('/'), href)
    }
}

/// Rows with fewer than five cells are layout rows and are skipped. A page
/// without the listing table yields no rows.
pub fn parse_report_listing(html: &str, document_host: &str) -> Result<Vec<ListingRow>, AdapterError> {
    let document = Html::parse_document(html);
    let table_sel = selector("table.type_1")?;
    let row_sel = selector("tr")?;
    let cell_sel = selector("td")?;
    let link_sel = selector(r#"a[href$=".pdf"]"#)?;

    let Some(table) = document.select(&table_sel).next() else {
        return Ok(Vec::new());
    };

    let rows = table
        .select(&row_sel)
        .filter_map(|row| {
            let cells: Vec<ElementRef<'_>> = row.select(&cell_sel).collect();
            if cells.len() < 5 {
                return None;
            }
            let document_url = row
                .select(&link_sel)
                .find_map(|a| a.value().attr("href"))
                .map(|href| absolute_document_url(href, document_host));
            Some(ListingRow {
                subject_name: cell_text(&cells[0]),
                title: cell_text(&cells[1]),
                publisher: cell_text(&cells[2]),
                document_url,
                listing_date: NaiveDate::parse_from_str(&cell_text(&cells[4]), "%y.%m.%d").ok(),
            })
        })
        .collect();

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "https://stock.pstatic.net";

    const PAGE: &str = r#"<html><body>
<table class="type_1" summary="종목분석 리포트">
  <tr><th>종목명</th><th>제목</th><th>증권사</th><th>첨부</th><th>작성일</th><th>조회수</th></tr>
  <tr><td colspan="6" class="blank_07"></td></tr>
  <tr>
    <td><a href="/item/main.naver?code=005930" class="stock_item">삼성전자</a></td>
    <td><a href="company_read.naver?nid=1">HBM 공급 확대 </a></td>
    <td>키움증권</td>
    <td class="file"><a href="/stock-research/company/20240517/report1.pdf"><img alt="PDF"/></a></td>
    <td class="date">24.05.17</td>
    <td class="date">1021</td>
  </tr>
  <tr>
    <td><a href="/item/main.naver?code=000660">SK하이닉스</a></td>
    <td><a href="company_read.naver?nid=2">실적 점검</a></td>
    <td>신한투자증권</td>
    <td class="file"><a href="https://ssl.pstatic.net/imgstock/upload/research/company/report2.pdf">PDF</a></td>
    <td class="date">24.05.16</td>
    <td class="date">77</td>
  </tr>
  <tr>
    <td>현대차</td><td>첨부 없음</td><td>대신증권</td><td class="file"></td><td class="date">24.05.17</td><td>3</td>
  </tr>
</table></body></html>"#;

    #[test]
    fn listing_rows_expose_cells_and_absolute_links() {
        let rows = parse_report_listing(PAGE, HOST).unwrap();
        assert_eq!(rows.len(), 3);

        assert_eq!(rows[0].subject_name, "삼성전자");
        assert_eq!(rows[0].title, "HBM 공급 확대");
        assert_eq!(rows[0].publisher, "키움증권");
        assert_eq!(
            rows[0].document_url.as_deref(),
            Some("https://stock.pstatic.net/stock-research/company/20240517/report1.pdf")
        );
        assert_eq!(rows[0].listing_date, NaiveDate::from_ymd_opt(2024, 5, 17));

        assert_eq!(
            rows[1].document_url.as_deref(),
            Some("https://ssl.pstatic.net/imgstock/upload/research/company/report2.pdf")
        );
        assert_eq!(rows[2].document_url, None);
    }

    #[test]
    fn page_without_listing_table_is_empty() {
        let rows = parse_report_listing("<html><body><p>점검 중</p></body></html>", HOST).unwrap();
        assert!(rows.is_empty());
    }
}
