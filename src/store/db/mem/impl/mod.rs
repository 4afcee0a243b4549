mod graph;
mod run;
mod step;
mod workflow;
