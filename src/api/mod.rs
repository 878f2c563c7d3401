pub mod health;
pub mod live_scores;
pub mod odds_view;
pub mod routes;
