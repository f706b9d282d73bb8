mod http_stub;

use http_stub::{Reply, StubServer};

fn urlset(locs: &[String]) -> String {
    let entries: String = locs
        .iter()
        .map(|loc| format!("  <url><loc>{loc}</loc></url>\n"))
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n{entries}</urlset>\n"
    )
}

fn two_level_site() -> StubServer {
    StubServer::spawn(|request| {
        let page = |n: u32| format!("https://blog.example/page-{n}/");
        match request.path() {
            "/sitemap.xml" => {
                // Children live on this same stub.
                let host = request.header("Host").unwrap_or_default();
                Reply::xml(format!(
                    "<?xml version=\"1.0\"?>\n<sitemapindex xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n  <sitemap><loc>http://{host}/posts.xml</loc></sitemap>\n  <sitemap><loc>http://{host}/pages.xml</loc></sitemap>\n</sitemapindex>\n"
                ))
            }
            "/posts.xml" => Reply::xml(urlset(&[page(1), page(2), page(3)])),
            "/pages.xml" => Reply::xml(urlset(&[page(3), page(4), page(5)])),
            _ => Reply::not_found(),
        }
    })
}

#[tokio::test]
async fn sitemap_index_yields_unique_urls_across_children() -> anyhow::Result<()> {
    let site = two_level_site();
    let client = reqwest::Client::new();

    let urls =
        postforge::sitemap::fetch_sitemap_urls(&client, &site.url("/sitemap.xml"), 50, None).await?;
    assert_eq!(
        urls,
        vec![
            "https://blog.example/page-1/",
            "https://blog.example/page-2/",
            "https://blog.example/page-3/",
            "https://blog.example/page-4/",
            "https://blog.example/page-5/",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn limit_caps_collected_urls() -> anyhow::Result<()> {
    let site = two_level_site();
    let client = reqwest::Client::new();

    let urls =
        postforge::sitemap::fetch_sitemap_urls(&client, &site.url("/sitemap.xml"), 2, None).await?;
    assert_eq!(urls.len(), 2);
    assert_eq!(urls[0], "https://blog.example/page-1/");
    Ok(())
}

#[tokio::test]
async fn failing_child_sitemap_aborts_the_fetch() {
    let site = StubServer::spawn(|request| match request.path() {
        "/sitemap.xml" => {
            let host = request.header("Host").unwrap_or_default();
            Reply::xml(format!(
                "<sitemapindex><sitemap><loc>http://{host}/missing.xml</loc></sitemap></sitemapindex>"
            ))
        }
        _ => Reply::not_found(),
    });

    let err = postforge::sitemap::fetch_sitemap_urls(
        &reqwest::Client::new(),
        &site.url("/sitemap.xml"),
        50,
        None,
    )
    .await
    .expect_err("missing child must fail");
    assert!(format!("{err:#}").contains("missing.xml"));
}

#[tokio::test]
async fn relay_prefix_is_used_for_every_fetch() -> anyhow::Result<()> {
    let site = StubServer::spawn(|request| {
        if request.path() != "/relay" {
            return Reply::not_found();
        }
        Reply::xml(urlset(&["https://blog.example/only/".to_owned()]))
    });

    let relay = site.url("/relay?url=");
    let urls = postforge::sitemap::fetch_sitemap_urls(
        &reqwest::Client::new(),
        "https://blog.example/sitemap.xml",
        10,
        Some(&relay),
    )
    .await?;
    assert_eq!(urls, vec!["https://blog.example/only/"]);

    let requests = site.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].url,
        "/relay?url=https%3A%2F%2Fblog.example%2Fsitemap.xml"
    );
    Ok(())
}
