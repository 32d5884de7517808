#[rocket::launch]
fn launch() -> _ {
    // The mail provider adapter is deployment-specific and injected by the
    // embedding binary; the stock daemon serves the query surface only.
    mailgraph::rocket(None)
}
