mod helpers;
mod lifecycle;
mod pipeline;
